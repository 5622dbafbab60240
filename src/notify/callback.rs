//! Stoppable callback slots
//!
//! The callback is taken out of the slot for the duration of a call so no
//! lock is held while user code runs. Stopping empties the slot; a call
//! already in flight finishes, but its callback is not put back.

use parking_lot::Mutex;

/// Boxed observer callback
pub type Callback<T> = Box<dyn FnMut(T) + Send + 'static>;

struct SlotState<T> {
    callback: Option<Callback<T>>,
    stopped: bool,
}

pub(crate) struct CallbackSlot<T> {
    state: Mutex<SlotState<T>>,
}

impl<T> CallbackSlot<T> {
    pub(crate) fn new(callback: Callback<T>) -> Self {
        Self {
            state: Mutex::new(SlotState {
                callback: Some(callback),
                stopped: false,
            }),
        }
    }

    /// Calls the callback with `value`. Returns false if the slot is
    /// stopped or the callback is already running.
    pub(crate) fn invoke(&self, value: T) -> bool {
        let taken = {
            let mut state = self.state.lock();
            if state.stopped {
                None
            } else {
                state.callback.take()
            }
        };
        let Some(mut callback) = taken else {
            return false;
        };

        callback(value);

        let mut state = self.state.lock();
        if !state.stopped && state.callback.is_none() {
            state.callback = Some(callback);
            return true;
        }
        drop(state);
        drop(callback);
        true
    }

    /// Stops the slot. Returns true on the first call.
    pub(crate) fn stop(&self) -> bool {
        let callback = {
            let mut state = self.state.lock();
            if state.stopped {
                return false;
            }
            state.stopped = true;
            state.callback.take()
        };
        drop(callback);
        true
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}
