//! Single-thread executor used for job starting and event publishing.
//!
//! Work runs in submission order on one named thread. A panicking work item
//! is logged and the thread keeps serving the queue.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, error};

use crate::error::{panic_message, IngestError};

type Work = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct SingleThreadExecutor {
    name: String,
    tx: Mutex<Option<Sender<Work>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl SingleThreadExecutor {
    pub(crate) fn new(name: &str) -> Result<Self, IngestError> {
        let (tx, rx) = unbounded::<Work>();
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                for work in rx.iter() {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(work)) {
                        error!(executor = %thread_name, panic = %panic_message(payload.as_ref()), "Work item panicked");
                    }
                }
                debug!(executor = %thread_name, "Executor drained");
            })
            .map_err(|e| IngestError::ThreadSpawn(format!("{name}: {e}")))?;

        let thread_id = handle.thread().id();
        Ok(Self {
            name: name.to_string(),
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    /// Queue work. Returns `false` once the executor has been shut down.
    pub(crate) fn submit(&self, work: impl FnOnce() + Send + 'static) -> bool {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(Box::new(work)).is_ok(),
            None => {
                debug!(executor = %self.name, "Executor shut down, dropping work");
                false
            }
        }
    }

    /// Stop accepting work, let queued work finish, and join the thread.
    /// Called from the executor's own thread it only closes the queue.
    pub(crate) fn shutdown(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if thread::current().id() == self.thread_id {
            return;
        }
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(executor = %self.name, "Executor thread panicked during shutdown");
            }
        }
    }
}

impl Drop for SingleThreadExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn runs_in_submission_order() {
        let executor = SingleThreadExecutor::new("test-order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let seen = Arc::clone(&seen);
            assert!(executor.submit(move || seen.lock().unwrap().push(i)));
        }
        executor.shutdown();
        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn survives_panicking_work() {
        let executor = SingleThreadExecutor::new("test-panic").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        executor.submit(|| panic!("listener blew up"));
        let c = Arc::clone(&count);
        executor.submit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        executor.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let executor = SingleThreadExecutor::new("test-closed").unwrap();
        executor.shutdown();
        assert!(!executor.submit(|| {}));
    }

    #[test]
    fn runs_off_the_calling_thread() {
        let executor = SingleThreadExecutor::new("test-thread").unwrap();
        let caller = thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));
        let r = Arc::clone(&ran_on);
        executor.submit(move || *r.lock().unwrap() = Some(thread::current().id()));
        executor.shutdown();
        let ran_on = ran_on.lock().unwrap().expect("work ran");
        assert_ne!(ran_on, caller);
    }
}
