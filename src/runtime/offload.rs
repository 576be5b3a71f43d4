//! Worker offload bridge.
//!
//! Blocking handler logic never runs on the reactor thread. [`WorkerPool::offload`]
//! moves a job onto a tokio blocking pool and returns an [`Offloaded`] future the
//! connection task awaits. When the job finishes (successfully or by panicking)
//! the result is put into a oneshot channel and the connection's
//! [`WakeupToken`] is fired, which the reactor observes as a readiness event.
//!
//! If the job is dropped without ever running, its completion guard still fires
//! the token, and the waiting side observes [`OffloadError::Abandoned`] instead of
//! hanging.

use std::any::Any;
use std::future::Future;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{trace, warn};

use super::wakeup::WakeupToken;

/// Why an offloaded job produced no result.
#[derive(Debug, Error)]
pub enum OffloadError {
    #[error("offloaded job panicked: {0}")]
    Panicked(String),

    #[error("offloaded job was dropped before completing")]
    Abandoned,
}

type Outcome<T> = Result<T, Box<dyn Any + Send>>;

/// Thread pool hosting offloaded handler executions.
pub struct WorkerPool {
    runtime: Runtime,
}

impl WorkerPool {
    /// Starts a pool with at most `threads` blocking workers.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while building the underlying runtime.
    pub fn new(threads: usize) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads.max(1))
            .thread_name("coweb-worker")
            .build()?;
        Ok(Self { runtime })
    }

    /// Runs `job` on a worker thread. The returned future completes on the
    /// reactor thread once `wakeup` has been fired by the worker.
    pub fn offload<T, F>(&self, wakeup: WakeupToken, job: F) -> Offloaded<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let completion = Completion {
            sender: Some(sender),
            wakeup: wakeup.create_copy(),
        };
        self.runtime.spawn_blocking(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            completion.complete(outcome);
        });
        Offloaded { receiver, wakeup }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").finish_non_exhaustive()
    }
}

// Worker-side half: delivers the outcome and fires the token exactly once,
// including when dropped without a result.
struct Completion<T> {
    sender: Option<oneshot::Sender<Outcome<T>>>,
    wakeup: WakeupToken,
}

impl<T> Completion<T> {
    fn complete(mut self, outcome: Outcome<T>) {
        if let Some(sender) = self.sender.take() {
            // The connection may already be gone; the fire below is then a no-op.
            let _ = sender.send(outcome);
        }
        self.signal();
    }

    fn signal(&self) {
        if let Err(e) = self.wakeup.fire() {
            warn!(error = %e, "failed to fire wakeup token");
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if self.sender.take().is_some() {
            self.signal();
        }
    }
}

/// Reactor-side half of an offloaded job.
///
/// Spurious resumptions (socket readiness on the same registration) keep it
/// suspended until the result is actually available.
#[must_use = "futures do nothing unless awaited"]
pub struct Offloaded<T> {
    receiver: oneshot::Receiver<Outcome<T>>,
    wakeup: WakeupToken,
}

impl<T> std::fmt::Debug for Offloaded<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Offloaded")
            .field("wakeup", &self.wakeup)
            .finish_non_exhaustive()
    }
}

impl<T> Future for Offloaded<T> {
    type Output = Result<T, OffloadError>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match self.receiver.try_recv() {
            Err(TryRecvError::Empty) => {
                trace!("offloaded job still running");
                return Poll::Pending;
            }
            Err(TryRecvError::Closed) => Err(OffloadError::Abandoned),
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(OffloadError::Panicked(panic_message(payload.as_ref()))),
        };
        self.wakeup.consume();
        Poll::Ready(result)
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
