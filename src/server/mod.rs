//! HTTP/1.1 server on the crate's own reactor.
//!
//! One thread runs the [`Reactor`]: an accept task registered under the
//! listening socket, plus one connection task per client. A connection task
//! reads a request with the incremental pipeline, hands it to the router on a
//! worker thread, then writes the response back. Connections are persistent
//! unless either side asks to close.

use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::http::{RequestError, Response, StatusCode, fetch_request};
use crate::net::{RECEIVE_CHUNK, SocketError, TcpClient, TcpListener};
use crate::router::{self, Router};
use crate::runtime::{Reactor, ReactorError, Spawner, Task, WakeupToken, WorkerPool};

pub mod config;

pub use crate::http::Limits;
pub use config::ServerConfig;

const MALFORMED_PAGE: &str = "Request format is malformed and could not be at all interpreted";
const TOO_LARGE_PAGE: &str = "Entity too large";

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("socket error: {0}")]
    Io(#[from] SocketError),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddrV4,
        #[source]
        source: SocketError,
    },

    #[error(transparent)]
    Reactor(#[from] ReactorError),

    #[error("failed to start the worker pool: {0}")]
    Runtime(#[source] std::io::Error),
}

/// A bound HTTP server.
///
/// # Examples
///
/// ```no_run
/// use coweb::router::{Router, callback};
/// use coweb::server::Server;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut router = Router::new();
/// router.get("/", [callback(|_req, res| {
///     res.set_html("Hello!");
///     Ok(())
/// })])?;
///
/// Server::bind(8080)?.run(router)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddrV4,
    config: ServerConfig,
}

impl Server {
    /// Binds to `0.0.0.0:port`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the port cannot be bound.
    pub fn bind(port: u16) -> Result<Self, ServerError> {
        Self::bind_addr(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
    }

    /// Binds to `addr`. Port `0` picks an ephemeral port; see
    /// [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub fn bind_addr(addr: SocketAddrV4) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            config: ServerConfig::default(),
        })
    }

    /// Replaces the default configuration.
    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the address the server is bound to.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    /// Serves `router` on the calling thread. Only returns on a fatal error.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Runtime`] if the worker pool cannot start.
    /// - [`ServerError::Reactor`] if the reactor fails, including when the
    ///   listening socket hits a hard accept error.
    pub fn run(self, router: Router) -> Result<(), ServerError> {
        let pool = WorkerPool::new(self.config.worker_threads).map_err(ServerError::Runtime)?;
        let mut reactor = Reactor::new()?;
        let shared = Rc::new(Shared {
            router: Arc::new(router),
            pool,
            limits: self.config.limits,
        });

        info!(address = %self.local_addr, workers = self.config.worker_threads, "coweb listening");
        let socket = self.listener.as_raw_fd();
        let acceptor = accept_loop(self.listener, reactor.spawner(), shared);
        reactor.register(socket, Task::new(acceptor), None)?;

        loop {
            reactor.wait()?;
        }
    }
}

/// Binds `0.0.0.0:port` and serves `router` forever.
///
/// # Errors
///
/// See [`Server::bind`] and [`Server::run`].
pub fn listen(port: u16, router: Router) -> Result<(), ServerError> {
    Server::bind(port)?.run(router)
}

// State shared by every task on the reactor thread.
struct Shared {
    router: Arc<Router>,
    pool: WorkerPool,
    limits: Limits,
}

async fn accept_loop(
    mut listener: TcpListener,
    spawner: Spawner,
    shared: Rc<Shared>,
) -> Result<(), SocketError> {
    loop {
        let client = listener.accept().await?;
        let socket = client.as_raw_fd();
        let wakeup = match WakeupToken::new() {
            Ok(token) => token,
            Err(error) => {
                warn!(fd = socket, %error, "no wakeup token for connection, dropping it");
                continue;
            }
        };
        debug!(fd = socket, "connection accepted");

        let connection = serve_connection(client, wakeup.create_copy(), Rc::clone(&shared));
        let task = Task::new(async move {
            connection.await;
            Ok::<_, Infallible>(())
        });
        spawner.register(socket, task, Some(wakeup));
    }
}

// Request/response cycles on one connection, strictly sequential.
async fn serve_connection(client: TcpClient, wakeup: WakeupToken, shared: Rc<Shared>) {
    let socket = client.as_raw_fd();
    let mut buffer = BytesMut::with_capacity(RECEIVE_CHUNK);

    loop {
        let request = match fetch_request(&client, &mut buffer, &shared.limits).await {
            Ok(request) => request,
            Err(RequestError::Closed) => {
                debug!(fd = socket, "peer closed connection");
                break;
            }
            Err(error) => {
                warn!(fd = socket, %error, "rejecting request");
                let response = rejection(&error);
                if client.send(&response.into_bytes()).await.is_err() {
                    debug!(fd = socket, "peer gone before rejection was sent");
                }
                break;
            }
        };

        // Answers with the 500 page if the worker never reports back.
        let mut fallback = shared.router.response_for(&request);
        let handler = Arc::clone(&shared.router);
        let response = match shared
            .pool
            .offload(wakeup.create_copy(), move || handler.dispatch(request))
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(fd = socket, %error, "handler fault");
                router::internal_error(&mut fallback);
                fallback
            }
        };

        let keep_open = response.is_persistent();
        if client.send(&response.into_bytes()).await.is_err() {
            debug!(fd = socket, "peer gone before response was sent");
            break;
        }
        if !keep_open {
            break;
        }
    }
    debug!(fd = socket, "connection closed");
}

fn rejection(error: &RequestError) -> Response {
    let status = error.status().unwrap_or(StatusCode::BadRequest);
    let page = match status {
        StatusCode::PayloadTooLarge => TOO_LARGE_PAGE,
        _ => MALFORMED_PAGE,
    };
    let mut response = Response::new(status);
    response.set_html(page).close_connection().mark_ready();
    response
}
