//! Home execution context for consumer-visible callbacks.
//!
//! Inbound events arrive on the event channel's serve task. They are never
//! run there: each one is posted as a job onto the consumer's home context,
//! which runs jobs one at a time in the order they were posted.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{BridgeError, Result};

/// A unit of work scheduled onto a home context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A scheduling context that runs posted jobs in FIFO order.
pub trait HomeContext: Send + Sync {
    /// Queue `job` without waiting for it to run.
    ///
    /// Fails only when the context has shut down.
    fn post(&self, job: Job) -> Result<()>;
}

/// Runs jobs on a single serial task of the tokio runtime it was captured on.
#[derive(Debug, Clone)]
pub struct SerialTaskContext {
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialTaskContext {
    /// Capture the calling code's tokio runtime as the home context.
    pub fn capture() -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| BridgeError::Config {
            message: "no tokio runtime to capture as the home context".to_string(),
        })?;
        Ok(Self::on(&handle))
    }

    /// Use `handle`'s runtime as the home context.
    pub fn on(handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            debug!("Home context queue closed");
        });
        Self { tx }
    }
}

impl HomeContext for SerialTaskContext {
    fn post(&self, job: Job) -> Result<()> {
        self.tx.send(job).map_err(|_| BridgeError::Config {
            message: "home context has shut down".to_string(),
        })
    }
}

/// Queues jobs until the owning thread drains them with `run_pending`.
///
/// Fits consumers that already own a frame or UI loop and want callbacks to
/// run on that loop's thread.
#[derive(Default)]
pub struct PumpedContext {
    queue: Mutex<VecDeque<Job>>,
}

impl PumpedContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every job queued so far on the calling thread. Returns how many ran.
    ///
    /// Jobs posted while draining wait for the next call.
    pub fn run_pending(&self) -> usize {
        let jobs = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *queue)
        };
        let count = jobs.len();
        for job in jobs {
            job();
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl HomeContext for PumpedContext {
    fn post(&self, job: Job) -> Result<()> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(job);
        Ok(())
    }
}
