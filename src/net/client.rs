//! Accepted client connection.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use bytes::Bytes;
use tracing::{debug, trace};

use super::{Attempt, RECEIVE_CHUNK, SocketError, Transport};
use crate::runtime::task::suspend;

/// A connected, non-blocking client socket.
///
/// Dropping the client closes it gracefully: the write side is shut down
/// first, then whatever the peer still has in flight is drained without
/// blocking, and only then is the descriptor released. This keeps the kernel
/// from answering unread data with a reset that would discard a response the
/// peer has not read yet.
#[derive(Debug)]
pub struct TcpClient {
    fd: Option<OwnedFd>,
}

impl TcpClient {
    pub(crate) fn from_owned(fd: OwnedFd) -> Self {
        Self { fd: Some(fd) }
    }

    fn raw(&self) -> Result<RawFd, SocketError> {
        self.fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or(SocketError::Closed)
    }

    /// Receives up to one chunk of bytes, suspending while none are available.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Closed`] when the peer performed an orderly
    /// shutdown or the read failed with anything other than would-block.
    pub async fn receive(&self) -> Result<Bytes, SocketError> {
        let fd = self.raw()?;
        let mut buf = vec![0u8; RECEIVE_CHUNK];
        loop {
            let ret = unsafe { libc::recv(fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len(), 0) };
            match Attempt::from_ret(ret) {
                Attempt::Done(0) => {
                    trace!(fd, "peer closed connection");
                    return Err(SocketError::Closed);
                }
                Attempt::Done(n) => {
                    buf.truncate(n);
                    return Ok(Bytes::from(buf));
                }
                Attempt::WouldBlock => suspend().await,
                Attempt::Retry => {}
                Attempt::Failed(error) => {
                    debug!(fd, error = %error, "receive failed");
                    return Err(SocketError::Closed);
                }
            }
        }
    }

    /// Sends every byte of `bytes`, suspending whenever the send buffer is full.
    ///
    /// Returns the total number of bytes written, which always equals
    /// `bytes.len()` on success.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Closed`] on any hard send error, such as the
    /// peer having reset the connection.
    pub async fn send(&self, bytes: &[u8]) -> Result<usize, SocketError> {
        let fd = self.raw()?;
        let mut sent = 0;
        while sent < bytes.len() {
            let rest = &bytes[sent..];
            let ret = unsafe {
                libc::send(
                    fd,
                    rest.as_ptr().cast::<libc::c_void>(),
                    rest.len(),
                    libc::MSG_NOSIGNAL,
                )
            };
            match Attempt::from_ret(ret) {
                Attempt::Done(n) => sent += n,
                Attempt::WouldBlock => suspend().await,
                Attempt::Retry => {}
                Attempt::Failed(error) => {
                    debug!(fd, error = %error, "send failed");
                    return Err(SocketError::Closed);
                }
            }
        }
        Ok(sent)
    }

    /// Shuts the write side down, drains pending input and closes the socket.
    /// Called automatically on drop.
    pub fn close(&mut self) {
        let Some(fd) = self.fd.take() else {
            return;
        };
        let raw = fd.as_raw_fd();
        if unsafe { libc::shutdown(raw, libc::SHUT_WR) } < 0 {
            // Not connected anymore: nothing left to drain.
            trace!(fd = raw, "shutdown failed, releasing descriptor");
            return;
        }
        let mut scratch = [0u8; 4096];
        loop {
            let ret = unsafe { libc::recv(raw, scratch.as_mut_ptr().cast::<libc::c_void>(), scratch.len(), 0) };
            if ret <= 0 {
                break;
            }
        }
        trace!(fd = raw, "client closed");
    }
}

impl Transport for TcpClient {
    fn receive(&self) -> impl Future<Output = Result<Bytes, SocketError>> + '_ {
        TcpClient::receive(self)
    }

    fn send<'a>(&'a self, bytes: &'a [u8]) -> impl Future<Output = Result<usize, SocketError>> + 'a {
        TcpClient::send(self, bytes)
    }
}

impl AsRawFd for TcpClient {
    /// Returns `-1` once the client has been closed.
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::TcpListener;
    use crate::runtime::task::{Task, TaskError};
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, SocketAddrV4, TcpStream};

    // Accepts one loopback connection, driving the accept task by spinning.
    fn pair() -> (TcpClient, TcpStream) {
        let mut listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let peer = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let mut task = Task::new(async move { listener.accept().await });
        while task.resume() {
            std::thread::yield_now();
        }
        (task.value().unwrap(), peer)
    }

    fn spin<T: 'static>(mut task: Task<T>) -> T {
        while task.resume() {
            std::thread::yield_now();
        }
        task.value().unwrap()
    }

    #[test]
    fn receive_returns_what_the_peer_wrote() {
        let (client, mut peer) = pair();
        peer.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();

        let bytes = spin(Task::new(async move { client.receive().await }));
        assert_eq!(&bytes[..], b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn receive_suspends_without_data() {
        let (client, _peer) = pair();
        let mut task = Task::new(async move { client.receive().await });
        assert!(task.resume());
        assert!(task.resume());
    }

    #[test]
    fn orderly_shutdown_reads_as_closed() {
        let (client, peer) = pair();
        peer.shutdown(std::net::Shutdown::Write).unwrap();
        let mut task = Task::new(async move { client.receive().await });
        while task.resume() {
            std::thread::yield_now();
        }
        let Err(TaskError::Failed(error)) = task.value() else {
            panic!("receive after shutdown must fail");
        };
        assert!(matches!(error.downcast_ref::<SocketError>(), Some(SocketError::Closed)));
    }

    #[test]
    fn send_writes_everything_and_close_ends_stream() {
        let (client, mut peer) = pair();
        let payload = vec![b'x'; 256 * 1024];
        let expected = payload.len();

        // The peer reads concurrently so the send buffer keeps draining.
        let reader = std::thread::spawn(move || {
            let mut received = Vec::new();
            peer.read_to_end(&mut received).unwrap();
            received.len()
        });
        let sent = spin(Task::new(async move {
            let sent = client.send(&payload).await?;
            drop(client);
            Ok::<_, SocketError>(sent)
        }));

        assert_eq!(sent, expected);
        assert_eq!(reader.join().unwrap(), expected);
    }
}
