use std::sync::Arc;

use parking_lot::Mutex;

/// Thread-safe multi-subscriber callback dispatcher. Subscribers are
/// copied out under the lock and invoked outside of it, so a callback
/// may itself subscribe or unsubscribe without deadlocking.
pub struct Event<T> {
    subscribers: Mutex<Vec<Arc<dyn Fn(&T) + Send + Sync>>>,
}

impl<T> Event<T> {
    pub fn new() -> Self {
        Event {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribers.lock().push(Arc::new(callback));
    }

    pub fn trigger(&self, value: &T) {
        let subscribers: Vec<_> = self.subscribers.lock().clone();
        for subscriber in subscribers {
            subscriber(value);
        }
    }

    pub fn clear(&self) {
        self.subscribers.lock().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}
