//! # Oni Control-Plane Protocol
//!
//! Wire contract between the Oni supervisor daemon and the processes that
//! drive it over HTTP.
//!
//! ## Overview
//!
//! - **Routes**: the fixed `(method, path)` table of the control plane
//! - **Messages**: JSON bodies for every success and failure response
//! - **Domain enums**: [`Mode`], [`WikiRole`], [`WikiState`]
//! - **Entries**: an insertion-ordered string-keyed map used for every
//!   id-keyed JSON object
//!
//! ## Route table
//!
//! ```text
//! GET  /api/health          {ok, status, mode}
//! GET  /api/status          {ok, mode, pid, uptimeMs, host, port, shuttingDown, wikis}
//! GET  /api/wikis           {ok, wikis}
//! POST /api/wiki/start?id=  {ok, started}
//! POST /api/wiki/stop?id=   {ok, stopped}
//! POST /api/shutdown        {ok, shuttingDown}
//! ```
//!
//! Failures are always `{ok: false, error: "<message>"}`.
//!
//! ## Example
//!
//! ```rust
//! use oni_protocol::{ErrorResponse, HealthResponse, Mode};
//!
//! let body = serde_json::to_string(&HealthResponse::new(Mode::Dev)).unwrap();
//! assert_eq!(body, r#"{"ok":true,"status":"ok","mode":"dev"}"#);
//!
//! let err = ErrorResponse::missing_query_param("id");
//! assert_eq!(err.error, "Missing query param: id");
//! ```

pub mod entries;
pub mod error;
pub mod messages;

pub use entries::Entries;
pub use error::{ProtocolError, Result};
pub use messages::{
    routes, ErrorResponse, HealthResponse, Mode, ShutdownResponse, StatusResponse, WikiRole,
    WikiStartedResponse, WikiState, WikiStatus, WikiStoppedResponse, WikisResponse, DEFAULT_HOST,
    DEFAULT_PORT,
};
