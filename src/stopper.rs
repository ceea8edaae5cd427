//! Coordinates background tasks with process shutdown. Asynchronous work
//! (intent resolution, gossip) is handed to the stopper; once shutdown has
//! begun, new tasks are refused and the caller is expected to run the work
//! synchronously instead, so nothing is silently dropped.

use crate::error::Result;

use std::sync::Mutex;
use std::thread::JoinHandle;

#[derive(Default)]
struct Inner {
    stopping: bool,
    tasks: Vec<JoinHandle<()>>,
}

/// Tracks background tasks and drains them on shutdown.
#[derive(Default)]
pub struct Stopper {
    inner: Mutex<Inner>,
}

impl Stopper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs a task synchronously on the calling thread, unless shutdown has
    /// begun. Returns false if the task was refused.
    pub fn run_task(&self, task: impl FnOnce()) -> bool {
        if let Ok(inner) = self.inner.lock() {
            if inner.stopping {
                return false;
            }
        }
        task();
        true
    }

    /// Runs a task on a background thread. If shutdown has begun, the task
    /// is handed back to the caller, who is expected to run it synchronously
    /// so the work is not silently dropped.
    pub fn run_async_task<F>(&self, task: F) -> std::result::Result<(), F>
    where
        F: FnOnce() + Send + 'static,
    {
        let Ok(mut inner) = self.inner.lock() else { return Err(task) };
        if inner.stopping {
            return Err(task);
        }
        inner.tasks.push(std::thread::spawn(task));
        Ok(())
    }

    /// Returns true once shutdown has begun.
    pub fn is_stopping(&self) -> Result<bool> {
        Ok(self.inner.lock()?.stopping)
    }

    /// Begins shutdown and waits for all background tasks to finish.
    pub fn stop(&self) {
        let tasks = match self.inner.lock() {
            Ok(mut inner) => {
                inner.stopping = true;
                std::mem::take(&mut inner.tasks)
            }
            Err(_) => return,
        };
        for task in tasks {
            let _ = task.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_tasks_until_stopped() {
        let stopper = Stopper::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        assert!(stopper
            .run_async_task(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .is_ok());
        let c = count.clone();
        assert!(stopper.run_task(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        stopper.stop();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // Tasks are refused after shutdown; the caller falls back to running
        // the work synchronously.
        let c = count.clone();
        if let Err(task) = stopper.run_async_task(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }) {
            task();
        }
        assert!(!stopper.run_task(|| unreachable!()));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
