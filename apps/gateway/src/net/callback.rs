//! Pending async-result queues.
//!
//! A [`CallbackProcessor`] holds completions for work that finished on
//! another task (storage writes, bot deliveries) and applies them exactly
//! once, on the owning object's next update tick. This keeps side effects on
//! session state single-threaded even though the work itself runs anywhere on
//! the runtime.

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

type Action<T> = Box<dyn FnOnce(T) + Send>;

struct Pending<T> {
    rx: oneshot::Receiver<T>,
    action: Action<T>,
}

pub struct CallbackProcessor<T> {
    pending: Mutex<Vec<Pending<T>>>,
}

impl<T: Send + 'static> CallbackProcessor<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Register a completion channel and the action to run with its result.
    pub fn add(&self, rx: oneshot::Receiver<T>, action: impl FnOnce(T) + Send + 'static) {
        self.pending.lock().push(Pending {
            rx,
            action: Box::new(action),
        });
    }

    /// Run the action for every completed entry; unfinished entries stay
    /// queued for the next tick. Entries whose producer was dropped are
    /// discarded.
    pub fn process_ready(&self) {
        let drained: Vec<Pending<T>> = {
            let mut pending = self.pending.lock();
            std::mem::take(&mut *pending)
        };

        let mut still_pending = Vec::new();
        for mut entry in drained {
            match entry.rx.try_recv() {
                Ok(value) => (entry.action)(value),
                Err(TryRecvError::Empty) => still_pending.push(entry),
                Err(TryRecvError::Closed) => {}
            }
        }

        if !still_pending.is_empty() {
            self.pending.lock().append(&mut still_pending);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl<T: Send + 'static> Default for CallbackProcessor<T> {
    fn default() -> Self {
        Self::new()
    }
}
