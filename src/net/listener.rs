//! Listening socket.

use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tracing::{debug, error, info};

use super::{Attempt, SocketError, TcpClient};
use crate::runtime::task::suspend;

/// Non-blocking IPv4 listening socket with address reuse enabled.
///
/// Accepting suspends the awaiting task until the reactor reports the
/// listener readable again.
///
/// # Examples
///
/// ```no_run
/// use coweb::net::TcpListener;
/// use std::net::{Ipv4Addr, SocketAddrV4};
///
/// let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))?;
/// println!("listening on {}", listener.local_addr()?);
/// # Ok::<(), coweb::net::SocketError>(())
/// ```
#[derive(Debug)]
pub struct TcpListener {
    fd: Option<OwnedFd>,
}

impl TcpListener {
    /// Binds and listens on `addr` with the system's maximum backlog.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Os`] naming the syscall that failed; an address
    /// already in use surfaces from `bind`.
    pub fn bind(addr: SocketAddrV4) -> Result<Self, SocketError> {
        let raw = unsafe {
            libc::socket(
                libc::AF_INET,
                libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                0,
            )
        };
        if raw < 0 {
            return Err(SocketError::last_os("socket"));
        }
        // SAFETY: fresh descriptor; closed by `OwnedFd` on any early return below.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let reuse: libc::c_int = 1;
        let ret = unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                (&raw const reuse).cast::<libc::c_void>(),
                socklen_of::<libc::c_int>(),
            )
        };
        if ret < 0 {
            return Err(SocketError::last_os("setsockopt"));
        }

        let sockaddr = to_sockaddr(addr);
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                (&raw const sockaddr).cast::<libc::sockaddr>(),
                socklen_of::<libc::sockaddr_in>(),
            )
        };
        if ret < 0 {
            return Err(SocketError::last_os("bind"));
        }

        if unsafe { libc::listen(fd.as_raw_fd(), libc::SOMAXCONN) } < 0 {
            return Err(SocketError::last_os("listen"));
        }

        let listener = Self { fd: Some(fd) };
        info!(addr = %listener.local_addr()?, "listening");
        Ok(listener)
    }

    /// The address the socket is actually bound to (resolves port 0).
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Closed`] after a hard accept failure, or the
    /// `getsockname` error.
    pub fn local_addr(&self) -> Result<SocketAddrV4, SocketError> {
        let fd = self.fd.as_ref().ok_or(SocketError::Closed)?;
        // SAFETY: all-zero is a valid `sockaddr_in`.
        let mut sockaddr: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut len = socklen_of::<libc::sockaddr_in>();
        let ret = unsafe {
            libc::getsockname(
                fd.as_raw_fd(),
                (&raw mut sockaddr).cast::<libc::sockaddr>(),
                &raw mut len,
            )
        };
        if ret < 0 {
            return Err(SocketError::last_os("getsockname"));
        }
        Ok(from_sockaddr(&sockaddr))
    }

    /// Waits for the next pending connection.
    ///
    /// Suspends while the backlog is empty. The accepted client is
    /// non-blocking.
    ///
    /// # Errors
    ///
    /// On a hard accept failure the listener closes itself and returns
    /// [`SocketError::Os`]; every later call returns [`SocketError::Closed`].
    pub async fn accept(&mut self) -> Result<TcpClient, SocketError> {
        loop {
            let fd = self.fd.as_ref().ok_or(SocketError::Closed)?.as_raw_fd();
            let ret = unsafe {
                libc::accept4(
                    fd,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            };
            match Attempt::from_ret(ret as isize) {
                Attempt::Done(_) => {
                    // SAFETY: accept4 returned a new descriptor we now own.
                    let client = unsafe { OwnedFd::from_raw_fd(ret) };
                    debug!(fd = ret, "client accepted");
                    return Ok(TcpClient::from_owned(client));
                }
                Attempt::WouldBlock => suspend().await,
                Attempt::Retry => {}
                Attempt::Failed(source) if source.raw_os_error() == Some(libc::ECONNABORTED) => {
                    debug!("pending connection aborted before accept");
                }
                Attempt::Failed(source) => {
                    error!(error = %source, "accept failed, closing listener");
                    self.fd = None;
                    return Err(SocketError::Os {
                        op: "accept4",
                        source,
                    });
                }
            }
        }
    }
}

impl AsRawFd for TcpListener {
    /// Returns `-1` once the listener has closed itself.
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn socklen_of<T>() -> libc::socklen_t {
    mem::size_of::<T>() as libc::socklen_t
}

fn to_sockaddr(addr: SocketAddrV4) -> libc::sockaddr_in {
    // SAFETY: all-zero is a valid `sockaddr_in`; the fields are filled below.
    let mut sockaddr: libc::sockaddr_in = unsafe { mem::zeroed() };
    sockaddr.sin_family = libc::AF_INET as libc::sa_family_t;
    sockaddr.sin_port = addr.port().to_be();
    sockaddr.sin_addr = libc::in_addr {
        s_addr: u32::from(*addr.ip()).to_be(),
    };
    sockaddr
}

fn from_sockaddr(sockaddr: &libc::sockaddr_in) -> SocketAddrV4 {
    SocketAddrV4::new(
        Ipv4Addr::from(u32::from_be(sockaddr.sin_addr.s_addr)),
        u16::from_be(sockaddr.sin_port),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::task::Task;

    #[test]
    fn sockaddr_conversion_keeps_port_and_ip() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 8080);
        assert_eq!(from_sockaddr(&to_sockaddr(addr)), addr);
    }

    #[test]
    fn bind_to_port_zero_resolves_a_port() {
        let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(*addr.ip(), Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn bind_reports_address_in_use() {
        // Two listeners on one port fail even with address reuse.
        let first = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let err = TcpListener::bind(first.local_addr().unwrap()).unwrap_err();
        assert!(matches!(err, SocketError::Os { op: "bind", .. }));
    }

    #[test]
    fn accept_suspends_until_a_client_connects() {
        let mut listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let (sender, receiver) = std::sync::mpsc::channel();

        // The listener is moved into the task; the address was captured above.
        let mut task = Task::new(async move {
            let client = listener.accept().await?;
            sender.send(client.as_raw_fd() >= 0).ok();
            Ok::<_, SocketError>(())
        });
        assert!(task.resume(), "no client yet, accept must suspend");

        let _peer = std::net::TcpStream::connect(addr).unwrap();
        // The connection is in the backlog once connect returns.
        while task.resume() {
            std::thread::yield_now();
        }
        assert!(task.value().is_ok());
        assert!(receiver.recv().unwrap());
    }
}
