//! Single-threaded readiness reactor built on edge-triggered epoll.
//!
//! The reactor owns the epoll instance and a registry mapping each connection
//! socket to its in-flight [`Task`]. Every registration carries one opaque
//! 64-bit tag packing the socket descriptor together with an optional
//! [`WakeupToken`] descriptor, so a single readiness event identifies which
//! connection to resume whether the socket or the background completion fired.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, error, trace};

use super::task::{BoxError, Task, TaskError};
use super::wakeup::WakeupToken;

/// Fatal reactor failures. None of these are retried.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("unfinished task for socket {fd} would be overwritten")]
    TaskOverwritten { fd: RawFd },

    #[error("finished task for socket {fd} was not removed from the registry")]
    FinishedTaskNotRemoved { fd: RawFd },

    #[error("task for socket {fd} failed: {source}")]
    TaskFailed {
        fd: RawFd,
        #[source]
        source: BoxError,
    },
}

const NO_WAKEUP: u32 = u32::MAX;

/// The pair of descriptors one registration answers to, packed into the epoll
/// event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tag {
    socket: RawFd,
    wakeup: Option<RawFd>,
}

impl Tag {
    pub(crate) fn new(socket: RawFd, wakeup: Option<RawFd>) -> Self {
        Self { socket, wakeup }
    }

    #[allow(clippy::cast_sign_loss)]
    pub(crate) fn pack(self) -> u64 {
        let wakeup = self.wakeup.map_or(NO_WAKEUP, |fd| fd as u32);
        (u64::from(wakeup) << 32) | u64::from(self.socket as u32)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub(crate) fn unpack(raw: u64) -> Self {
        let socket = raw as u32 as RawFd;
        let wakeup = (raw >> 32) as u32;
        Self {
            socket,
            wakeup: (wakeup != NO_WAKEUP).then_some(wakeup as RawFd),
        }
    }
}

struct Entry {
    task: Task<()>,
    wakeup: Option<WakeupToken>,
}

struct Registration {
    socket: RawFd,
    task: Task<()>,
    wakeup: Option<WakeupToken>,
}

/// Handle that lets running tasks queue new registrations.
///
/// Tasks execute while the reactor is busy resuming them, so they cannot
/// register directly; queued registrations are processed as soon as the
/// current resumption returns.
#[derive(Clone, Default)]
pub struct Spawner {
    queue: Rc<RefCell<VecDeque<Registration>>>,
}

impl Spawner {
    /// Queues `task` for registration under `socket`, optionally watching `wakeup` too.
    pub fn register(&self, socket: RawFd, task: Task<()>, wakeup: Option<WakeupToken>) {
        self.queue.borrow_mut().push_back(Registration {
            socket,
            task,
            wakeup,
        });
    }

    fn pop(&self) -> Option<Registration> {
        self.queue.borrow_mut().pop_front()
    }
}

impl std::fmt::Debug for Spawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spawner")
            .field("queued", &self.queue.borrow().len())
            .finish()
    }
}

/// Owns the OS readiness multiplexer and the socket → task registry.
///
/// # Examples
///
/// ```no_run
/// use coweb::runtime::{reactor::Reactor, task::Task};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut reactor = Reactor::new()?;
/// # let socket = 0;
/// reactor.register(socket, Task::new(async { Ok::<_, std::io::Error>(()) }), None)?;
/// loop {
///     reactor.wait()?;
/// }
/// # }
/// ```
pub struct Reactor {
    epoll: OwnedFd,
    registry: HashMap<RawFd, Entry>,
    spawner: Spawner,
}

impl Reactor {
    /// Creates the epoll instance.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::Os`] if `epoll_create1` fails.
    pub fn new() -> Result<Self, ReactorError> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(os_error("epoll_create1"));
        }
        // SAFETY: freshly created descriptor, owned only here.
        let epoll = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            epoll,
            registry: HashMap::new(),
            spawner: Spawner::default(),
        })
    }

    /// Returns a handle tasks can use to register further tasks.
    pub fn spawner(&self) -> Spawner {
        self.spawner.clone()
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Returns `true` when no task is registered.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Returns `true` if an unfinished task is registered under `socket`.
    pub fn is_registered(&self, socket: RawFd) -> bool {
        self.registry.contains_key(&socket)
    }

    /// Arms edge-triggered readiness for `socket` (and `wakeup`, if any), resumes
    /// `task` once so it runs up to its first real suspension, and stores it.
    ///
    /// A task that already finished during that first resume is not stored.
    ///
    /// # Errors
    ///
    /// - [`ReactorError::TaskOverwritten`] if an unfinished task is already
    ///   registered for `socket`.
    /// - [`ReactorError::Os`] if arming the multiplexer fails.
    /// - [`ReactorError::TaskFailed`] if the task fails on its first resume.
    pub fn register(
        &mut self,
        socket: RawFd,
        task: Task<()>,
        wakeup: Option<WakeupToken>,
    ) -> Result<(), ReactorError> {
        self.register_one(Registration {
            socket,
            task,
            wakeup,
        })?;
        self.drain_spawned()
    }

    /// Blocks until one readiness notification arrives and resumes the task it
    /// belongs to. A task that is done afterwards is removed and its wakeup
    /// descriptor released.
    ///
    /// # Errors
    ///
    /// - [`ReactorError::Os`] if `epoll_wait` fails.
    /// - [`ReactorError::FinishedTaskNotRemoved`] if the registry holds a finished task.
    /// - [`ReactorError::TaskFailed`] if the resumed task failed.
    pub fn wait(&mut self) -> Result<(), ReactorError> {
        let raw = self.wait_one()?;
        let tag = Tag::unpack(raw);

        let Some(entry) = self.registry.get_mut(&tag.socket) else {
            trace!(fd = tag.socket, "readiness for unregistered socket ignored");
            return Ok(());
        };
        let registered_wakeup = entry.wakeup.as_ref().map(AsRawFd::as_raw_fd);
        if registered_wakeup != tag.wakeup {
            trace!(fd = tag.socket, "stale readiness from a previous registration ignored");
            return Ok(());
        }
        if entry.task.done() {
            error!(fd = tag.socket, "finished task still registered");
            return Err(ReactorError::FinishedTaskNotRemoved { fd: tag.socket });
        }

        trace!(fd = tag.socket, "resuming task");
        entry.task.resume();
        if entry.task.done() {
            if let Some(entry) = self.registry.remove(&tag.socket) {
                self.release(tag.socket, entry)?;
            }
        }
        self.drain_spawned()
    }

    fn register_one(&mut self, registration: Registration) -> Result<(), ReactorError> {
        let Registration {
            socket,
            mut task,
            wakeup,
        } = registration;

        if self.registry.get(&socket).is_some_and(|entry| !entry.task.done()) {
            error!(fd = socket, "registration would overwrite an unfinished task");
            return Err(ReactorError::TaskOverwritten { fd: socket });
        }

        let wakeup_fd = wakeup.as_ref().map(AsRawFd::as_raw_fd);
        let tag = Tag::new(socket, wakeup_fd).pack();
        let socket_events = libc::EPOLLIN | libc::EPOLLOUT | libc::EPOLLRDHUP | libc::EPOLLET;
        self.control(libc::EPOLL_CTL_ADD, socket, socket_events, tag)?;
        if let Some(efd) = wakeup_fd {
            self.control(libc::EPOLL_CTL_ADD, efd, libc::EPOLLIN | libc::EPOLLET, tag)?;
        }
        debug!(fd = socket, efd = ?wakeup_fd, "socket registered");

        task.resume();
        let entry = Entry { task, wakeup };
        if entry.task.done() {
            return self.release(socket, entry);
        }
        self.registry.insert(socket, entry);
        Ok(())
    }

    fn drain_spawned(&mut self) -> Result<(), ReactorError> {
        while let Some(registration) = self.spawner.pop() {
            self.register_one(registration)?;
        }
        Ok(())
    }

    // Stops watching the wakeup descriptor before dropping the registry's copy,
    // so late fires from workers that still hold a copy are no-ops.
    fn release(&self, socket: RawFd, mut entry: Entry) -> Result<(), ReactorError> {
        debug!(fd = socket, "task finished, socket removed from reactor");
        if let Some(token) = entry.wakeup.take() {
            let efd = token.as_raw_fd();
            let ret = unsafe {
                libc::epoll_ctl(
                    self.epoll.as_raw_fd(),
                    libc::EPOLL_CTL_DEL,
                    efd,
                    std::ptr::null_mut(),
                )
            };
            if ret < 0 {
                trace!(efd, error = %io::Error::last_os_error(), "wakeup descriptor already gone");
            }
        }
        match entry.task.value() {
            Ok(()) | Err(TaskError::NoValue) => Ok(()),
            Err(TaskError::Failed(source)) => {
                error!(fd = socket, error = %source, "task failed");
                Err(ReactorError::TaskFailed { fd: socket, source })
            }
        }
    }

    fn control(&self, op: libc::c_int, fd: RawFd, events: libc::c_int, tag: u64) -> Result<(), ReactorError> {
        #[allow(clippy::cast_sign_loss)]
        let mut event = libc::epoll_event {
            events: events as u32,
            u64: tag,
        };
        let ret = unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &raw mut event) };
        if ret < 0 {
            return Err(os_error("epoll_ctl"));
        }
        Ok(())
    }

    fn wait_one(&self) -> Result<u64, ReactorError> {
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        loop {
            let n = unsafe { libc::epoll_wait(self.epoll.as_raw_fd(), &raw mut event, 1, -1) };
            if n >= 1 {
                // Copied out: fields of the packed struct cannot be borrowed.
                let (events, tag) = (event.events, event.u64);
                trace!(events, "readiness notification");
                return Ok(tag);
            }
            if n < 0 {
                let source = io::Error::last_os_error();
                if source.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %source, "epoll_wait failed");
                return Err(ReactorError::Os {
                    op: "epoll_wait",
                    source,
                });
            }
        }
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("epoll", &self.epoll.as_raw_fd())
            .field("registered", &self.registry.len())
            .finish()
    }
}

fn os_error(op: &'static str) -> ReactorError {
    ReactorError::Os {
        op,
        source: io::Error::last_os_error(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::task::suspend;
    use std::cell::Cell;

    // A wakeup token doubles as a pollable "socket" for the registry tests.
    fn pollable() -> WakeupToken {
        WakeupToken::new().unwrap()
    }

    fn suspending(times: usize, counter: Rc<Cell<usize>>) -> Task<()> {
        Task::new(async move {
            for _ in 0..times {
                counter.set(counter.get() + 1);
                suspend().await;
            }
            Ok::<_, io::Error>(())
        })
    }

    #[test]
    fn tag_round_trips_both_descriptors() {
        let tag = Tag::new(7, Some(12));
        assert_eq!(Tag::unpack(tag.pack()), tag);
        let bare = Tag::new(7, None);
        assert_eq!(Tag::unpack(bare.pack()), bare);
    }

    #[test]
    fn register_resumes_task_once() {
        let mut reactor = Reactor::new().unwrap();
        let socket = pollable();
        let counter = Rc::new(Cell::new(0));
        reactor
            .register(socket.as_raw_fd(), suspending(2, Rc::clone(&counter)), None)
            .unwrap();
        assert_eq!(counter.get(), 1);
        assert!(reactor.is_registered(socket.as_raw_fd()));
    }

    #[test]
    fn task_finishing_on_first_resume_is_not_stored() {
        let mut reactor = Reactor::new().unwrap();
        let socket = pollable();
        reactor
            .register(socket.as_raw_fd(), suspending(0, Rc::default()), None)
            .unwrap();
        assert!(reactor.is_empty());
    }

    #[test]
    fn second_unfinished_registration_is_fatal() {
        let mut reactor = Reactor::new().unwrap();
        let socket = pollable();
        let fd = socket.as_raw_fd();
        reactor.register(fd, suspending(3, Rc::default()), None).unwrap();
        let err = reactor
            .register(fd, suspending(3, Rc::default()), None)
            .unwrap_err();
        assert!(matches!(err, ReactorError::TaskOverwritten { fd: f } if f == fd));
    }

    #[test]
    fn wakeup_resumes_and_removes_finished_task() {
        let mut reactor = Reactor::new().unwrap();
        let socket = pollable();
        let wakeup = WakeupToken::new().unwrap();
        let counter = Rc::new(Cell::new(0));
        reactor
            .register(
                socket.as_raw_fd(),
                suspending(1, Rc::clone(&counter)),
                Some(wakeup.create_copy()),
            )
            .unwrap();
        assert_eq!(wakeup.owners(), 2);

        wakeup.fire().unwrap();
        reactor.wait().unwrap();
        assert!(reactor.is_empty());
        assert_eq!(wakeup.owners(), 1);
    }

    #[test]
    fn failed_task_is_reported() {
        let mut reactor = Reactor::new().unwrap();
        let socket = pollable();
        let wakeup = WakeupToken::new().unwrap();
        let task: Task<()> = Task::new(async {
            suspend().await;
            Err(io::Error::other("listener broke"))
        });
        reactor
            .register(socket.as_raw_fd(), task, Some(wakeup.create_copy()))
            .unwrap();
        wakeup.fire().unwrap();
        let err = reactor.wait().unwrap_err();
        assert!(matches!(err, ReactorError::TaskFailed { .. }));
    }

    #[test]
    fn spawner_registrations_are_processed_after_resume() {
        let mut reactor = Reactor::new().unwrap();
        let spawner = reactor.spawner();
        let parent = pollable();
        let child = pollable();
        let child_fd = child.as_raw_fd();
        let counter = Rc::new(Cell::new(0));
        let child_counter = Rc::clone(&counter);

        let task = Task::new(async move {
            spawner.register(child_fd, suspending(1, child_counter), None);
            suspend().await;
            Ok::<_, io::Error>(())
        });
        reactor.register(parent.as_raw_fd(), task, None).unwrap();

        assert!(reactor.is_registered(child_fd));
        assert_eq!(counter.get(), 1);
        assert_eq!(reactor.len(), 2);
    }
}
