//! Non-blocking TCP sockets whose I/O operations suspend on would-block.
//!
//! - [`listener`]: [`TcpListener`] binding with address reuse and accepting clients
//! - [`client`]: [`TcpClient`] with chunked receive, full send and graceful close
//!
//! Every operation here is meant to be awaited from inside a
//! [`Task`](crate::runtime::Task) registered with the reactor: on `EAGAIN` the
//! operation suspends, and it retries the syscall when the reactor resumes the
//! task after the next readiness edge.

use std::future::Future;
use std::io;

use bytes::Bytes;
use thiserror::Error;

pub mod client;
pub mod listener;

pub use client::TcpClient;
pub use listener::TcpListener;

/// Size of a single `receive` chunk.
pub const RECEIVE_CHUNK: usize = 8 * 1024;

/// Socket-level failures.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The peer went away: zero-length read or a hard send/receive error.
    #[error("connection closed")]
    Closed,

    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl SocketError {
    pub(crate) fn last_os(op: &'static str) -> Self {
        Self::Os {
            op,
            source: io::Error::last_os_error(),
        }
    }
}

/// Byte stream the HTTP pipeline reads requests from and writes interim
/// responses to.
///
/// [`TcpClient`] is the production implementation; tests substitute scripted
/// transports to simulate fragmented delivery.
pub trait Transport {
    /// Receives the next chunk of bytes; never returns an empty chunk.
    fn receive(&self) -> impl Future<Output = Result<Bytes, SocketError>> + '_;

    /// Sends all of `bytes`, returning the total number of bytes written.
    fn send<'a>(&'a self, bytes: &'a [u8]) -> impl Future<Output = Result<usize, SocketError>> + 'a;
}

// Outcome of one non-blocking syscall.
pub(crate) enum Attempt {
    Done(usize),
    WouldBlock,
    Retry,
    Failed(io::Error),
}

impl Attempt {
    #[allow(clippy::cast_sign_loss)]
    pub(crate) fn from_ret(ret: isize) -> Self {
        if ret >= 0 {
            return Self::Done(ret as usize);
        }
        let error = io::Error::last_os_error();
        match error.kind() {
            io::ErrorKind::WouldBlock => Self::WouldBlock,
            io::ErrorKind::Interrupted => Self::Retry,
            _ => Self::Failed(error),
        }
    }
}
