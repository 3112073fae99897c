//! # Oni Supervisor
//!
//! Single-instance daemon that manages the lifecycle of a set of wiki
//! runtimes and exposes an HTTP control plane for them.
//!
//! ## Overview
//!
//! One supervisor runs per mode (`dev` or `prod`) per host. It provides:
//!
//! - **Configuration**: the `twos.config.json` document, normalised into typed records
//! - **Single-instance lock**: a PID file per mode, with stale-file recovery
//! - **Wiki lifecycle**: a per-wiki state machine driven by start/stop requests
//! - **Control plane**: JSON over HTTP for status queries and lifecycle commands
//! - **Graceful shutdown**: from the API, SIGINT or SIGTERM, run exactly once
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Supervisor                         │
//! ├───────────────────────────────────────────────────────────┤
//! │                                                           │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────────────┐  │
//! │  │   PidLock    │  │ SignalHooks  │  │  WikiRuntime ×N │  │
//! │  └──────────────┘  └──────────────┘  └─────────────────┘  │
//! │                                                           │
//! │  ┌─────────────────────────────────────────────────────┐  │
//! │  │            ControlPlane (axum, /api/*)              │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//!                              ▲
//!                              │ HTTP/JSON
//!                     ControlClient (twos CLI)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use oni_daemon::{Supervisor, TwosConfig};
//! use oni_protocol::Mode;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = TwosConfig::load("twos.config.json")?;
//!     let supervisor = Supervisor::start(Mode::Dev, config).await?;
//!
//!     // Runs until POST /api/shutdown, SIGINT or SIGTERM.
//!     supervisor.wait().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and normalisation
//! - [`pidfile`]: Per-mode single-instance lock
//! - [`wiki`]: Per-wiki lifecycle state machine
//! - [`supervisor`]: Startup, lifecycle operations and shutdown
//! - [`control`]: HTTP control plane server and client
//! - [`signals`]: SIGINT/SIGTERM hooks

pub mod config;
pub mod control;
pub mod pidfile;
pub mod signals;
pub mod supervisor;
pub mod wiki;

// Re-export protocol for convenience
pub use oni_protocol;

// Re-export config types for convenience
pub use config::{ConfigError, ServerConfig, Settings, TwosConfig, WikiConfig, DEFAULT_CONFIG_FILE};

// Re-export control plane types for convenience
pub use control::{ClientError, ControlClient, ControlPlane};

// Re-export lock types for convenience
pub use pidfile::{LockError, PidLock};

// Re-export supervisor types for convenience
pub use supervisor::{Supervisor, SupervisorError, SupervisorOptions};

pub use wiki::WikiRuntime;
