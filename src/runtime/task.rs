//! Resumable units of cooperative computation.
//!
//! A [`Task`] owns a boxed future and an explicit state slot. Whoever holds the
//! task drives it with [`Task::resume`]; there are no wakers involved, the
//! [`Reactor`](super::reactor::Reactor) decides when a suspended task is worth
//! resuming based on readiness events.
//!
//! Awaiting a `Task` from inside another task is the iterative-resume
//! combinator: every time the inner task is not done the outer one suspends to
//! its own resumer, and on each re-entry the inner task is resumed again, until
//! its value becomes available.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use thiserror::Error;

/// Boxed error carried by a failed task.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, BoxError>>>>;

/// Errors surfaced by [`Task::value`].
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("no value available")]
    NoValue,

    #[error("task failed: {0}")]
    Failed(#[source] BoxError),
}

// Lifecycle of a task. `Drained` is a completed task whose value was taken.
enum State<T> {
    Created,
    Running,
    Suspended,
    Completed(T),
    Failed(BoxError),
    Drained,
}

impl<T> State<T> {
    fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::Drained => "drained",
        }
    }
}

/// A resumable computation with an eventual result or failure.
///
/// Ownership is exclusive: a task moves between whoever currently holds it
/// (the caller, the reactor registry, or an outer task awaiting it). Dropping a
/// task that has not finished drops its underlying future, releasing every
/// resource it holds at its current suspension point.
///
/// # Examples
///
/// ```
/// use coweb::runtime::task::{Task, suspend};
///
/// let mut task = Task::new(async {
///     suspend().await;
///     Ok::<_, std::io::Error>(42)
/// });
///
/// assert!(task.resume()); // suspended once
/// assert!(!task.resume()); // completed
/// assert!(task.done());
/// assert_eq!(task.value().unwrap(), 42);
/// assert!(task.value().is_err()); // drained
/// ```
pub struct Task<T> {
    future: Option<BoxFuture<T>>,
    state: State<T>,
}

impl<T: 'static> Task<T> {
    /// Wraps a future into a task. Nothing runs until the first [`resume`](Self::resume).
    pub fn new<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + 'static,
        E: Into<BoxError>,
    {
        Self {
            future: Some(Box::pin(async move { future.await.map_err(Into::into) })),
            state: State::Created,
        }
    }
}

impl<T> Task<T> {
    /// Advances the computation until its next suspension or completion.
    ///
    /// Returns `true` while more resumption is needed.
    ///
    /// # Panics
    ///
    /// Resuming a task that already completed or failed is a programming error.
    pub fn resume(&mut self) -> bool {
        if self.done() {
            panic!("resumed a task in terminal state `{}`", self.state.name());
        }
        let Some(future) = self.future.as_mut() else {
            panic!("task in state `{}` has no future", self.state.name());
        };

        self.state = State::Running;
        let mut cx = Context::from_waker(Waker::noop());
        self.state = match future.as_mut().poll(&mut cx) {
            Poll::Pending => {
                self.state = State::Suspended;
                return true;
            }
            Poll::Ready(Ok(value)) => State::Completed(value),
            Poll::Ready(Err(error)) => State::Failed(error),
        };
        // Release everything the computation captured as soon as it finishes.
        self.future = None;
        false
    }

    /// Returns `true` once the task has completed or failed.
    pub fn done(&self) -> bool {
        matches!(
            self.state,
            State::Completed(_) | State::Failed(_) | State::Drained
        )
    }

    /// Returns `true` if the task has produced a value or a failure that was not taken yet.
    pub fn has_value(&self) -> bool {
        matches!(self.state, State::Completed(_) | State::Failed(_))
    }

    /// Takes the result out of a finished task.
    ///
    /// # Errors
    ///
    /// - [`TaskError::Failed`] if the computation failed.
    /// - [`TaskError::NoValue`] if the task has not finished, or its result was
    ///   already taken.
    pub fn value(&mut self) -> Result<T, TaskError> {
        match std::mem::replace(&mut self.state, State::Drained) {
            State::Completed(value) => Ok(value),
            State::Failed(error) => Err(TaskError::Failed(error)),
            other => {
                self.state = other;
                Err(TaskError::NoValue)
            }
        }
    }
}

// The future is boxed and the result slot is never pinned.
impl<T> Unpin for Task<T> {}

impl<T> Future for Task<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if !this.done() {
            this.resume();
        }
        if this.done() {
            Poll::Ready(this.value())
        } else {
            Poll::Pending
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("state", &self.state.name())
            .finish_non_exhaustive()
    }
}

/// Future that suspends the current task exactly once.
///
/// This is the explicit cooperative yield used on would-block: the task gives
/// control back to its resumer and continues on the next resume.
#[derive(Debug, Default)]
#[must_use = "futures do nothing unless awaited"]
pub struct Suspend {
    yielded: bool,
}

/// Suspends the current task until it is resumed again.
pub fn suspend() -> Suspend {
    Suspend::default()
}

impl Future for Suspend {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            Poll::Pending
        }
    }
}
