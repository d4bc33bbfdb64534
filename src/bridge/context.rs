//! Application context
//!
//! A dedicated thread that runs listener dispatches one at a time, in the
//! order they were submitted. Engine threads hand it a job and wait on a
//! one-slot reply channel with a deadline, so a stuck listener costs the
//! engine at most that deadline.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no answer within {0:?}")]
    TimedOut(Duration),

    #[error("application context is shut down")]
    Closed,

    #[error("listener panicked")]
    Abandoned,
}

struct Inner {
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

/// Handle to the application thread. Cheap to clone.
#[derive(Clone)]
pub struct ApplicationContext {
    inner: Arc<Inner>,
}

impl ApplicationContext {
    /// Start the application thread
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();

        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in rx {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("listener panicked on application context");
                    }
                }
                debug!("application context stopped");
            })?;

        let thread_id = worker.thread().id();
        Ok(Self {
            inner: Arc::new(Inner {
                sender: Mutex::new(Some(tx)),
                worker: Mutex::new(Some(worker)),
                thread_id,
            }),
        })
    }

    /// Whether the caller is running on the application thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    /// Run `job` on the application thread and wait up to `timeout` for its
    /// result. Runs inline when already on the application thread.
    pub fn run_sync<R, F>(&self, timeout: Duration, job: F) -> Result<R, DispatchError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_current() {
            return Ok(job());
        }

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let wrapped: Job = Box::new(move || {
            let _ = reply_tx.send(job());
        });

        let sender = self.inner.sender.lock().clone().ok_or(DispatchError::Closed)?;
        sender.send(wrapped).map_err(|_| DispatchError::Closed)?;
        drop(sender);

        reply_rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => DispatchError::TimedOut(timeout),
            RecvTimeoutError::Disconnected => DispatchError::Abandoned,
        })
    }

    /// Stop accepting jobs, drain the queue and join the thread.
    pub fn shutdown(&self) {
        self.inner.sender.lock().take();

        if self.is_current() {
            return;
        }
        if let Some(worker) = self.inner.worker.lock().take() {
            let _ = worker.join();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.sender.lock().is_none()
    }
}
