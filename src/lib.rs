//! # coweb
//!
//! An HTTP/1.1 server built on its own single-threaded epoll reactor.
//!
//! Connections are cooperative [`Task`](runtime::Task)s resumed by the
//! [`Reactor`](runtime::Reactor) whenever their socket becomes ready. Request
//! handling runs on a worker pool and signals completion back to the reactor
//! through a [`WakeupToken`](runtime::WakeupToken), so handlers may block
//! without stalling other connections.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use coweb::router::{Router, callback, validators};
//! use coweb::server::listen;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.get("/{number}/squared", [
//!         validators::path_param_int("number"),
//!         callback(|req, res| {
//!             let n: i64 = req.path_param("number").unwrap_or("0").parse().unwrap_or(0);
//!             res.set_json(&serde_json::json!({ "number": n, "squared": n * n }))?;
//!             Ok(())
//!         }),
//!     ])?;
//!     listen(8080, router)?;
//!     Ok(())
//! }
//! ```

pub mod http;
pub mod net;
pub mod router;
pub mod runtime;
pub mod server;

pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{Callback, HandlerError, Router, callback};
pub use server::{Server, ServerConfig, ServerError, listen};
