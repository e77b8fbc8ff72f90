use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<std::collections::VecDeque<Task>>,
    not_empty: Condvar,
    done: Condvar,
    running: Mutex<bool>,
    active: Mutex<usize>,
}

/// Bounded pool of OS threads draining a single task queue.
///
/// Every asynchronous duty in this crate (heartbeat send, multicast
/// receive, service dispatch, subscriber polling) runs as a loop
/// enqueued here, rather than as a spawned future: there is no async
/// runtime anywhere in this crate.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(num_workers: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(std::collections::VecDeque::new()),
            not_empty: Condvar::new(),
            done: Condvar::new(),
            running: Mutex::new(true),
            active: Mutex::new(0),
        });
        let mut workers = Vec::with_capacity(num_workers.max(1));
        for id in 0..num_workers.max(1) {
            let shared = Arc::clone(&shared);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("zlc-worker-{id}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn worker thread"),
            );
        }
        WorkerPool {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Schedule `task` to run on the next free worker. A no-op (with a
    /// warning) once the pool has been stopped.
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !*self.shared.running.lock() {
            tracing::warn!("enqueue on stopped worker pool ignored");
            return;
        }
        self.shared.queue.lock().push_back(Box::new(task));
        self.shared.not_empty.notify_one();
    }

    /// Block until the queue is empty and no task is in flight.
    pub fn wait(&self) {
        let mut queue = self.shared.queue.lock();
        loop {
            let active = *self.shared.active.lock();
            if queue.is_empty() && active == 0 {
                return;
            }
            self.shared.done.wait(&mut queue);
        }
    }

    /// Stop accepting new work, wake every worker, and join them.
    /// Pending tasks that have not started are dropped.
    pub fn stop(&self) {
        *self.shared.running.lock() = false;
        self.shared.not_empty.notify_all();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    break Some(task);
                }
                if !*shared.running.lock() {
                    break None;
                }
                shared.not_empty.wait(&mut queue);
            }
        };
        let Some(task) = task else { break };
        *shared.active.lock() += 1;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            let msg = panic_message(&payload);
            tracing::warn!(error = %msg, "worker task panicked");
        }
        *shared.active.lock() -= 1;
        shared.done.notify_all();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_enqueued_tasks() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        pool.stop();
    }

    #[test]
    fn survives_panicking_task() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        pool.enqueue(|| panic!("boom"));
        {
            let counter = Arc::clone(&counter);
            pool.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        pool.stop();
    }

    #[test]
    fn enqueue_after_stop_is_noop() {
        let pool = WorkerPool::new(1);
        pool.stop();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = Arc::clone(&counter);
        pool.enqueue(move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
