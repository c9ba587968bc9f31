//! A single background thread that runs long operations in submission order.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use crate::error::DpkError;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct BackgroundWorker {
    sender: Option<Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

/// Receives the result of one submitted job.
#[must_use = "a job's result is only observed through its handle"]
pub struct JobHandle<T> {
    label: &'static str,
    receiver: Receiver<Result<T, DpkError>>,
}

impl BackgroundWorker {
    /// Starts the worker thread.
    ///
    /// # Errors
    /// Returns [`DpkError::Worker`] when the thread cannot be spawned.
    pub fn spawn() -> Result<Self, DpkError> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread = thread::Builder::new()
            .name("dpk-worker".to_string())
            .spawn(move || {
                for job in receiver {
                    job();
                }
                debug!("worker queue closed");
            })
            .map_err(|err| DpkError::Worker(format!("failed to start worker thread: {err}")))?;
        Ok(Self {
            sender: Some(sender),
            thread: Some(thread),
        })
    }

    /// Queues `job` behind every job submitted before it.
    pub fn submit<T, F>(&self, label: &'static str, job: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, DpkError> + Send + 'static,
    {
        let (reply, receiver) = mpsc::channel();
        let wrapped: Job = Box::new(move || {
            debug!(job = label, "job started");
            let result = panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(job = label, "job panicked: {message}");
                Err(DpkError::Worker(format!("{label} panicked: {message}")))
            });
            if reply.send(result).is_err() {
                warn!(job = label, "job result dropped; nobody is waiting");
            }
        });
        match &self.sender {
            Some(sender) if sender.send(wrapped).is_ok() => {}
            _ => warn!(job = label, "worker is shut down; job discarded"),
        }
        JobHandle { label, receiver }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("worker thread terminated abnormally");
            }
        }
    }
}

impl<T> JobHandle<T> {
    /// Blocks until the job has finished.
    ///
    /// # Errors
    /// Returns the job's own error, or [`DpkError::Worker`] if it never ran.
    pub fn wait(self) -> Result<T, DpkError> {
        self.receiver
            .recv()
            .map_err(|_| DpkError::Worker(format!("{} was never run", self.label)))?
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
