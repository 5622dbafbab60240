//! Run loops
//!
//! A `RunLoop` is an explicit, thread-bound executor. Other threads hand
//! it work through an `ExecutorHandle`; the owning thread drives it,
//! either synchronously with `run_pending` or from async code with `run`
//! and `run_until_idle`.

use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

/// Unit of work executed on a run loop
pub type Task = Box<dyn FnOnce() + Send + 'static>;

static NEXT_EXECUTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a run loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutorId(u64);

impl ExecutorId {
    fn next() -> Self {
        Self(NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Sending side of a run loop. `Send`, cheap to clone.
#[derive(Debug, Clone)]
pub struct ExecutorHandle {
    id: ExecutorId,
    sender: mpsc::UnboundedSender<Task>,
    closed: Arc<AtomicBool>,
}

impl ExecutorHandle {
    pub fn id(&self) -> ExecutorId {
        self.id
    }

    /// Queues a task. Returns false if the run loop is closed or gone.
    pub fn spawn(&self, task: impl FnOnce() + Send + 'static) -> bool {
        if self.is_closed() {
            return false;
        }
        self.sender.send(Box::new(task)).is_ok()
    }

    /// Asks `RunLoop::run` to return once the queue is drained.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // wake a parked `run`
            let _ = self.sender.send(Box::new(|| {}));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A thread-bound task queue.
pub struct RunLoop {
    handle: ExecutorHandle,
    receiver: mpsc::UnboundedReceiver<Task>,
    _not_send: PhantomData<Rc<()>>,
}

impl RunLoop {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            handle: ExecutorHandle {
                id: ExecutorId::next(),
                sender,
                closed: Arc::new(AtomicBool::new(false)),
            },
            receiver,
            _not_send: PhantomData,
        }
    }

    pub fn id(&self) -> ExecutorId {
        self.handle.id
    }

    pub fn handle(&self) -> ExecutorHandle {
        self.handle.clone()
    }

    /// Runs every task queued so far, including tasks those tasks queue.
    /// Returns the number of tasks run.
    pub fn run_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            count += 1;
        }
        count
    }

    /// Runs tasks until the queue stays empty across a scheduler yield.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut count = self.run_pending();
        loop {
            tokio::task::yield_now().await;
            let ran = self.run_pending();
            if ran == 0 {
                return count;
            }
            count += ran;
        }
    }

    /// Waits up to `timeout` for one task and runs it, then drains the
    /// queue. Returns the number of tasks run.
    pub async fn run_for(&mut self, timeout: Duration) -> usize {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(task)) => {
                task();
                1 + self.run_pending()
            }
            _ => 0,
        }
    }

    /// Runs tasks as they arrive until the handle is closed.
    pub async fn run(&mut self) {
        while let Some(task) = self.receiver.recv().await {
            task();
            if self.handle.is_closed() {
                self.run_pending();
                return;
            }
        }
    }
}

impl Default for RunLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLoop").field("id", &self.handle.id).finish()
    }
}
