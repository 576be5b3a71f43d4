//! Cooperative single-threaded runtime.
//!
//! - [`task`]: [`Task`](task::Task), the resumable unit of work, and [`suspend`](task::suspend)
//! - [`wakeup`]: [`WakeupToken`](wakeup::WakeupToken), the cross-thread fire-once signal
//! - [`reactor`]: [`Reactor`](reactor::Reactor), epoll plus the socket → task registry
//! - [`offload`]: [`WorkerPool`](offload::WorkerPool), the bridge to blocking handler code

pub mod offload;
pub mod reactor;
pub mod task;
pub mod wakeup;

pub use offload::{OffloadError, Offloaded, WorkerPool};
pub use reactor::{Reactor, ReactorError, Spawner};
pub use task::{BoxError, Task, TaskError, suspend};
pub use wakeup::WakeupToken;
