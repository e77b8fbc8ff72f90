use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::worker_pool::WorkerPool;

const STOP_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs a callback at a fixed interval on a [`WorkerPool`], with a stop
/// that blocks until the in-flight iteration has actually returned.
pub struct PeriodicTask {
    running: Arc<AtomicBool>,
    done: Arc<(Mutex<bool>, Condvar)>,
    started: Mutex<bool>,
}

impl PeriodicTask {
    pub fn new() -> Self {
        PeriodicTask {
            running: Arc::new(AtomicBool::new(true)),
            done: Arc::new((Mutex::new(false), Condvar::new())),
            started: Mutex::new(false),
        }
    }

    /// Enqueue the loop. Calling this more than once is a no-op.
    pub fn start<F>(&self, pool: &WorkerPool, interval: Duration, mut callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        let mut started = self.started.lock();
        if *started {
            return;
        }
        *started = true;
        let running = Arc::clone(&self.running);
        let done = Arc::clone(&self.done);
        pool.enqueue(move || {
            while running.load(Ordering::SeqCst) {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback())) {
                    let msg = super_panic_message(&payload);
                    tracing::warn!(error = %msg, "periodic task callback panicked");
                }
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                std::thread::sleep(interval);
            }
            let (lock, cvar) = &*done;
            *lock.lock() = true;
            cvar.notify_all();
        });
    }

    /// Clear the running flag and block until the final iteration has
    /// returned, or until a 5-second safety timeout elapses (logged as
    /// a warning, not treated as an error).
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let (lock, cvar) = &*self.done;
        let mut finished = lock.lock();
        if !*finished {
            let result = cvar.wait_for(&mut finished, STOP_WAIT_TIMEOUT);
            if result.timed_out() && !*finished {
                tracing::warn!("periodic task did not stop within 5s");
            }
        }
    }
}

impl Default for PeriodicTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

fn super_panic_message(payload: &(dyn std::any::Any + Send)) -> String {
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
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn stop_blocks_until_final_iteration_returns() {
        let pool = WorkerPool::new(2);
        let task = PeriodicTask::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        {
            let ticks = Arc::clone(&ticks);
            task.start(&pool, Duration::from_millis(10), move || {
                ticks.fetch_add(1, Ordering::SeqCst);
            });
        }
        std::thread::sleep(Duration::from_millis(35));
        task.stop();
        let after_stop = ticks.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
        pool.stop();
    }

    #[test]
    fn survives_panicking_callback() {
        let pool = WorkerPool::new(1);
        let task = PeriodicTask::new();
        task.start(&pool, Duration::from_millis(5), || panic!("boom"));
        std::thread::sleep(Duration::from_millis(30));
        task.stop();
        pool.stop();
    }
}
