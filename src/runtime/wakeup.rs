//! Cross-thread, single-shot wakeup signal backed by an eventfd.
//!
//! The reactor watches the token's descriptor next to a connection socket.
//! Any thread holding a copy can [`fire`](WakeupToken::fire) it, which produces
//! a readiness event for that connection's registration.

use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use tracing::trace;

/// A reference-counted eventfd that wakes the reactor when fired.
///
/// Cloning creates another owner of the same descriptor; the descriptor is
/// closed exactly once, when the last owner is dropped.
#[derive(Clone)]
pub struct WakeupToken {
    fd: Arc<OwnedFd>,
}

impl WakeupToken {
    /// Creates a new non-blocking eventfd.
    ///
    /// # Errors
    ///
    /// Returns the OS error if `eventfd(2)` fails (e.g. descriptor exhaustion).
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` was just returned by eventfd and is owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { fd: Arc::new(fd) })
    }

    /// Another owner of the same signal. Equivalent to `clone`.
    #[must_use]
    pub fn create_copy(&self) -> Self {
        self.clone()
    }

    /// Signals the token. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the eventfd write fails for a reason other than
    /// a saturated counter (which already implies a pending wakeup).
    pub fn fire(&self) -> io::Result<()> {
        let value: u64 = 1;
        let written = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                (&raw const value).cast::<libc::c_void>(),
                size_of::<u64>(),
            )
        };
        if written < 0 {
            let error = io::Error::last_os_error();
            if error.kind() != io::ErrorKind::WouldBlock {
                return Err(error);
            }
        }
        trace!(efd = self.fd.as_raw_fd(), "wakeup token fired");
        Ok(())
    }

    /// Resets the counter so a later fire produces a fresh event.
    ///
    /// Returns `true` if the token had been fired since the last consume.
    pub fn consume(&self) -> bool {
        let mut value: u64 = 0;
        let read = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                (&raw mut value).cast::<libc::c_void>(),
                size_of::<u64>(),
            )
        };
        read > 0 && value > 0
    }

    /// Number of live owners of the underlying descriptor.
    pub fn owners(&self) -> usize {
        Arc::strong_count(&self.fd)
    }
}

impl AsRawFd for WakeupToken {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl fmt::Debug for WakeupToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeupToken")
            .field("efd", &self.fd.as_raw_fd())
            .field("owners", &self.owners())
            .finish()
    }
}
