//! HTTP control plane for a running supervisor.
//!
//! ## Overview
//!
//! The supervisor answers JSON requests on `host:port` from its
//! `oniServers` entry. Every response, errors included, is a JSON object with
//! an `ok` field; failures carry an `error` message:
//!
//! | Path               | Method | Success body                                  |
//! |--------------------|--------|-----------------------------------------------|
//! | `/api/health`      | GET    | `{"ok":true,"status":"ok","mode":…}`          |
//! | `/api/status`      | GET    | supervisor snapshot, see `StatusResponse`     |
//! | `/api/wikis`       | GET    | `{"ok":true,"wikis":{…}}`                     |
//! | `/api/wiki/start`  | POST   | `{"ok":true,"started":"<id>"}` (`?id=` query) |
//! | `/api/wiki/stop`   | POST   | `{"ok":true,"stopped":"<id>"}` (`?id=` query) |
//! | `/api/shutdown`    | POST   | `{"ok":true,"shuttingDown":true}`             |
//!
//! Unknown paths answer 404, a known path with the wrong method 405, a
//! missing or empty `id` 400, and supervisor failures 500.
//!
//! ## Example
//!
//! ```rust,no_run
//! use oni_daemon::control::ControlClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ControlClient::new("localhost", 7357)?;
//!     client.start_wiki("main").await?;
//!
//!     for (id, wiki) in &client.wikis().await?.wikis {
//!         println!("{id}: {}", wiki.state);
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod server;

pub use client::{ClientError, ControlClient, DEFAULT_TIMEOUT_SECS};
pub use server::{router, ApiError, ControlPlane};

/// Base URL for a control plane at `host:port`. IPv6 literals are bracketed.
pub fn base_url(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{host}]:{port}")
    } else {
        format!("http://{host}:{port}")
    }
}
