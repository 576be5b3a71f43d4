//! Small coweb service.
//!
//! ```text
//! cargo run --example squares -- 8080
//! curl http://localhost:8080/12/squared
//! curl -d '{"message":"hi"}' -H 'Content-Type: application/json' http://localhost:8080/echo
//! ```
//!
//! Set `RUST_LOG=coweb=debug` to watch connections come and go.

use coweb::router::{HandlerError, Router, callback, validators};
use coweb::server::{Server, ServerConfig};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn squared() -> coweb::Callback {
    callback(|req, res| {
        let number: i64 = req
            .path_param("number")
            .and_then(|n| n.parse().ok())
            .ok_or(HandlerError::NoMatch)?;
        let squared = number
            .checked_mul(number)
            .ok_or_else(|| HandlerError::custom(format!("{number} squared overflows")))?;
        res.set_json(&json!({ "number": number, "squared": squared }))?;
        Ok(())
    })
}

fn echo() -> coweb::Callback {
    callback(|req, res| {
        let message = req.json()?.get("message").cloned().unwrap_or_default();
        res.set_json(&json!({ "echo": message }))?;
        Ok(())
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = match std::env::args().nth(1) {
        Some(port) => port.parse()?,
        None => 8080,
    };

    let mut router = Router::new();
    router
        .get("/{number}/squared", [validators::path_param_int("number"), squared()])?
        .post("/echo", [validators::body_string("message"), echo()])?
        .allow_origin("*");

    Server::bind(port)?
        .with_config(ServerConfig::default().worker_threads(4))
        .run(router)?;
    Ok(())
}
