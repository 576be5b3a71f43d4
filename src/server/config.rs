//! Server configuration, fixed before [`Server::run`](super::Server::run).

use std::num::NonZeroUsize;
use std::thread;

use serde::Deserialize;

use crate::http::Limits;

/// Settings for a [`Server`](super::Server).
///
/// Built with chained setters or deserialized (every field is optional):
///
/// ```
/// use coweb::server::ServerConfig;
///
/// let config = ServerConfig::default()
///     .max_header_length(16 * 1024)
///     .max_body_length(1024 * 1024)
///     .worker_threads(4);
/// assert_eq!(config.limits.max_header_length, 16 * 1024);
///
/// let config: ServerConfig = serde_json::from_str(r#"{"worker_threads": 2}"#).unwrap();
/// assert_eq!(config.worker_threads, 2);
/// assert_eq!(config.limits.max_body_length, 1_000_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Size limits enforced while reading requests.
    pub limits: Limits,
    /// Upper bound on threads running offloaded handlers.
    pub worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            worker_threads: thread::available_parallelism().map_or(1, NonZeroUsize::get),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn max_header_length(mut self, bytes: usize) -> Self {
        self.limits.max_header_length = bytes;
        self
    }

    #[must_use]
    pub fn max_body_length(mut self, bytes: usize) -> Self {
        self.limits.max_body_length = bytes;
        self
    }

    /// Sets the worker thread bound; `0` is raised to `1`.
    #[must_use]
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert!(config.worker_threads >= 1);
        assert_eq!(config.limits, Limits::default());
    }

    #[test]
    fn zero_workers_is_raised() {
        assert_eq!(ServerConfig::default().worker_threads(0).worker_threads, 1);
    }

    #[test]
    fn partial_limits_deserialize() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"limits": {"max_header_length": 512}}"#).unwrap();
        assert_eq!(config.limits.max_header_length, 512);
        assert_eq!(config.limits.max_body_length, 1_000_000);
    }
}
