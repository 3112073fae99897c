//! Control-plane message definitions.
//!
//! Every control-plane response is a JSON object carrying an `ok` flag. The
//! types here are the single source of truth for those bodies: the daemon
//! serializes them and the client deserializes them.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entries::Entries;
use crate::error::ProtocolError;

/// Host the CLI talks to when nothing else is configured.
pub const DEFAULT_HOST: &str = "localhost";

/// Port the CLI talks to when nothing else is configured.
pub const DEFAULT_PORT: u16 = 7357;

/// Control-plane routes.
pub mod routes {
    /// `GET` liveness probe.
    pub const HEALTH: &str = "/api/health";
    /// `GET` full supervisor status.
    pub const STATUS: &str = "/api/status";
    /// `GET` wiki statuses keyed by id.
    pub const WIKIS: &str = "/api/wikis";
    /// `POST` request a wiki start, `?id=<wiki>`.
    pub const WIKI_START: &str = "/api/wiki/start";
    /// `POST` request a wiki stop, `?id=<wiki>`.
    pub const WIKI_STOP: &str = "/api/wiki/stop";
    /// `POST` shut the supervisor down.
    pub const SHUTDOWN: &str = "/api/shutdown";

    /// Query parameter naming the target wiki.
    pub const ID_PARAM: &str = "id";
}

/// Daemon configuration profile. Each mode has its own lock file and port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Dev,
    Prod,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Dev, Mode::Prod];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Dev => "dev",
            Mode::Prod => "prod",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Mode::Dev),
            "prod" => Ok(Mode::Prod),
            other => Err(ProtocolError::UnknownMode(other.to_string())),
        }
    }
}

/// Role of a wiki within the deployment.
///
/// The legacy names `master` and `default` are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WikiRole {
    #[serde(alias = "master")]
    Primary,
    #[serde(alias = "default")]
    Secondary,
}

impl WikiRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WikiRole::Primary => "primary",
            WikiRole::Secondary => "secondary",
        }
    }
}

impl fmt::Display for WikiRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WikiRole {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" | "master" => Ok(WikiRole::Primary),
            "secondary" | "default" => Ok(WikiRole::Secondary),
            other => Err(ProtocolError::UnknownRole(other.to_string())),
        }
    }
}

/// Lifecycle state of a supervised wiki.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WikiState {
    /// Not running. The state every wiki starts in.
    Stopped,
    /// Start requested, process not yet confirmed healthy.
    Starting,
    /// Process confirmed healthy.
    Running,
    /// Stop requested, process not yet confirmed gone.
    Stopping,
    /// A start or stop attempt failed, or the process crashed.
    Error,
}

impl WikiState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WikiState::Stopped => "stopped",
            WikiState::Starting => "starting",
            WikiState::Running => "running",
            WikiState::Stopping => "stopping",
            WikiState::Error => "error",
        }
    }
}

impl fmt::Display for WikiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WikiState {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(WikiState::Stopped),
            "starting" => Ok(WikiState::Starting),
            "running" => Ok(WikiState::Running),
            "stopping" => Ok(WikiState::Stopping),
            "error" => Ok(WikiState::Error),
            other => Err(ProtocolError::UnknownState(other.to_string())),
        }
    }
}

/// Point-in-time snapshot of one wiki.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WikiStatus {
    pub id: String,
    pub role: WikiRole,
    pub scopes: Vec<String>,
    #[serde(rename = "twCoreVersion")]
    pub core_version: String,
    pub root_path: PathBuf,
    #[serde(rename = "twPluginPaths", default, skip_serializing_if = "Vec::is_empty")]
    pub plugin_paths: Vec<PathBuf>,
    pub host: String,
    pub port: u16,
    pub https: bool,
    pub state: WikiState,
}

/// Body of `GET /api/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub status: String,
    pub mode: Mode,
}

impl HealthResponse {
    pub fn new(mode: Mode) -> Self {
        Self {
            ok: true,
            status: "ok".to_string(),
            mode,
        }
    }
}

/// Body of `GET /api/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub ok: bool,
    pub mode: Mode,
    pub pid: u32,
    pub uptime_ms: u64,
    pub host: String,
    pub port: u16,
    pub shutting_down: bool,
    pub wikis: Entries<WikiStatus>,
}

/// Body of `GET /api/wikis`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikisResponse {
    pub ok: bool,
    pub wikis: Entries<WikiStatus>,
}

impl WikisResponse {
    pub fn new(wikis: Entries<WikiStatus>) -> Self {
        Self { ok: true, wikis }
    }
}

/// Body of a successful `POST /api/wiki/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiStartedResponse {
    pub ok: bool,
    pub started: String,
}

impl WikiStartedResponse {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            ok: true,
            started: id.into(),
        }
    }
}

/// Body of a successful `POST /api/wiki/stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiStoppedResponse {
    pub ok: bool,
    pub stopped: String,
}

impl WikiStoppedResponse {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            ok: true,
            stopped: id.into(),
        }
    }
}

/// Body of `POST /api/shutdown`, sent before the shutdown begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownResponse {
    pub ok: bool,
    pub shutting_down: bool,
}

impl Default for ShutdownResponse {
    fn default() -> Self {
        Self {
            ok: true,
            shutting_down: true,
        }
    }
}

/// Body of every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: error.into(),
        }
    }

    /// Unknown route.
    pub fn not_found() -> Self {
        Self::new("Not found")
    }

    /// Known route, wrong method.
    pub fn method_not_allowed(required: &str) -> Self {
        Self::new(format!("Method Not Allowed. Use {}.", required))
    }

    /// Required query parameter absent or empty.
    pub fn missing_query_param(name: &str) -> Self {
        Self::new(format!("Missing query param: {}", name))
    }
}
