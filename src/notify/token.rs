//! Notification tokens

use std::fmt;

use parking_lot::Mutex;

type StopAction = Box<dyn FnOnce() + Send + 'static>;

/// Keeps a registration alive.
///
/// `stop()` is idempotent and guarantees that no delivery begins after it
/// returns. Dropping the token stops it.
#[must_use = "dropping a NotificationToken stops its notifications"]
pub struct NotificationToken {
    label: String,
    action: Mutex<Option<StopAction>>,
}

impl NotificationToken {
    pub(crate) fn new(label: impl Into<String>, action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// Stops the registration.
    pub fn stop(&self) {
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.action.lock().is_none()
    }
}

impl Drop for NotificationToken {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for NotificationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationToken")
            .field("label", &self.label)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
