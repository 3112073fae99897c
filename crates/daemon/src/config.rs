//! Configuration model for the Oni supervisor.
//!
//! The configuration is a single JSON document, `twos.config.json` by
//! default:
//!
//! ```json
//! {
//!   "settings":   { "primaryWiki": "main" },
//!   "oniServers": { "dev": { "enabled": true, "port": 7357, "pidPath": "./pids" } },
//!   "wikis":      { "main": { "role": "primary", "twCoreVersion": "5.3.0",
//!                             "rootPath": "./wikis/main", "host": "127.0.0.1",
//!                             "port": 8080, "autoStart": true } }
//! }
//! ```
//!
//! Each section is first read into a raw record with optional fields and then
//! normalised field by field, so a document that parses always yields fully
//! typed records. Key order of `oniServers` and `wikis` is kept.

use std::fs;
use std::path::{Path, PathBuf};

use oni_protocol::{Entries, Mode, WikiRole};
use serde::Deserialize;
use thiserror::Error;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "twos.config.json";

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{section}.{key}: missing required field \"{field}\"")]
    MissingField {
        section: &'static str,
        key: String,
        field: &'static str,
    },

    #[error("oniServers: unknown mode {0:?} (expected \"dev\" or \"prod\")")]
    UnknownMode(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("wikis: wiki id must not be empty")]
    EmptyWikiId,

    #[error("settings.primaryWiki names unknown wiki {0:?}")]
    UnknownPrimaryWiki(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Global settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Settings {
    /// Id of the designated primary wiki, if any.
    pub primary_wiki: Option<String>,
}

/// Per-mode supervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub mode: Mode,
    /// A disabled mode refuses to start.
    pub enabled: bool,
    /// Control-plane bind host.
    pub host: String,
    /// Control-plane bind port.
    pub port: u16,
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Directory for log files; stderr only when absent.
    pub log_path: Option<PathBuf>,
    /// Directory holding the `oni-<mode>.pid` lock file.
    pub pid_path: PathBuf,
}

/// Configuration of one supervised wiki. Never mutated after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiConfig {
    pub id: String,
    pub role: WikiRole,
    pub scopes: Vec<String>,
    /// Wiki engine version the runtime is pinned to.
    pub core_version: String,
    pub root_path: PathBuf,
    pub plugin_paths: Vec<PathBuf>,
    pub https: bool,
    pub host: String,
    pub port: u16,
    /// Request a start as soon as the supervisor is up.
    pub auto_start: bool,
}

/// The whole configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TwosConfig {
    pub settings: Settings,
    /// Server configs keyed by mode name.
    pub oni_servers: Entries<ServerConfig>,
    /// Wiki configs keyed by wiki id.
    pub wikis: Entries<WikiConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    settings: RawSettings,
    #[serde(rename = "oniServers", default)]
    oni_servers: Entries<RawServer>,
    #[serde(default)]
    wikis: Entries<RawWiki>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(alias = "masterWiki")]
    primary_wiki: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServer {
    enabled: Option<bool>,
    host: Option<String>,
    port: Option<u16>,
    log_level: Option<String>,
    log_path: Option<PathBuf>,
    pid_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWiki {
    role: Option<WikiRole>,
    scopes: Option<Vec<String>>,
    tw_core_version: Option<String>,
    root_path: Option<PathBuf>,
    tw_plugin_paths: Option<Vec<PathBuf>>,
    https: Option<bool>,
    host: Option<String>,
    port: Option<u16>,
    auto_start: Option<bool>,
}

fn required<T>(
    value: Option<T>,
    section: &'static str,
    key: &str,
    field: &'static str,
) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingField {
        section,
        key: key.to_string(),
        field,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn check_log_level(level: &str) -> Result<(), ConfigError> {
    if VALID_LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(ConfigError::InvalidLogLevel(level.to_string()))
    }
}

impl ServerConfig {
    fn normalise(key: &str, raw: RawServer) -> Result<Self, ConfigError> {
        let mode: Mode = key
            .parse()
            .map_err(|_| ConfigError::UnknownMode(key.to_string()))?;

        let log_level = non_empty(raw.log_level).unwrap_or_else(|| "info".to_string());
        check_log_level(&log_level)?;

        Ok(Self {
            mode,
            enabled: raw.enabled.unwrap_or(false),
            host: non_empty(raw.host).unwrap_or_else(|| "localhost".to_string()),
            port: required(raw.port, "oniServers", key, "port")?,
            log_level,
            log_path: raw.log_path,
            pid_path: raw.pid_path.unwrap_or_else(|| PathBuf::from("./pids")),
        })
    }
}

impl WikiConfig {
    fn normalise(id: &str, raw: RawWiki) -> Result<Self, ConfigError> {
        if id.trim().is_empty() {
            return Err(ConfigError::EmptyWikiId);
        }

        Ok(Self {
            id: id.to_string(),
            role: required(raw.role, "wikis", id, "role")?,
            scopes: raw.scopes.unwrap_or_default(),
            core_version: required(non_empty(raw.tw_core_version), "wikis", id, "twCoreVersion")?,
            root_path: required(raw.root_path, "wikis", id, "rootPath")?,
            plugin_paths: raw.tw_plugin_paths.unwrap_or_default(),
            https: raw.https.unwrap_or(false),
            host: required(non_empty(raw.host), "wikis", id, "host")?,
            port: required(raw.port, "wikis", id, "port")?,
            auto_start: raw.auto_start.unwrap_or(false),
        })
    }
}

impl TwosConfig {
    /// Load and validate the configuration file at `path`.
    ///
    /// A missing file is an error: the supervisor has nothing to manage
    /// without one.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_json(&contents)?;
        tracing::debug!(
            path = %path.display(),
            servers = config.oni_servers.len(),
            wikis = config.wikis.len(),
            "loaded config"
        );
        Ok(config)
    }

    /// Parse, normalise and validate a configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(json)?;

        let mut oni_servers = Entries::new();
        for (key, server) in raw.oni_servers {
            let server = ServerConfig::normalise(&key, server)?;
            oni_servers.insert(key, server);
        }

        let mut wikis = Entries::new();
        for (id, wiki) in raw.wikis {
            let wiki = WikiConfig::normalise(&id, wiki)?;
            wikis.insert(id, wiki);
        }

        let config = Self {
            settings: Settings {
                primary_wiki: non_empty(raw.settings.primary_wiki),
            },
            oni_servers,
            wikis,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for server in self.oni_servers.values() {
            check_log_level(&server.log_level)?;
        }

        if let Some(primary) = &self.settings.primary_wiki {
            if !self.wikis.contains_key(primary) {
                return Err(ConfigError::UnknownPrimaryWiki(primary.clone()));
            }
        }

        Ok(())
    }

    /// Server configuration for `mode`, if present.
    pub fn server(&self, mode: Mode) -> Option<&ServerConfig> {
        self.oni_servers.get(mode.as_str())
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - TWOS_LOG_LEVEL: Override the log level of every server
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("TWOS_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                for server in self.oni_servers.values_mut() {
                    server.log_level = level.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
{
  "settings": { "primaryWiki": "main" },
  "oniServers": {
    "dev":  { "enabled": true, "host": "127.0.0.1", "port": 7357, "logLevel": "debug", "pidPath": "/tmp/oni" },
    "prod": { "enabled": false, "port": 7358 }
  },
  "wikis": {
    "main": {
      "role": "primary",
      "scopes": ["public"],
      "twCoreVersion": "5.3.0",
      "rootPath": "/srv/wikis/main",
      "https": true,
      "host": "127.0.0.1",
      "port": 8080,
      "autoStart": true
    },
    "notes": {
      "role": "default",
      "twCoreVersion": "5.2.7",
      "rootPath": "/srv/wikis/notes",
      "twPluginPaths": ["/srv/plugins"],
      "host": "127.0.0.1",
      "port": 8081
    }
  }
}
"#;

    #[test]
    fn test_from_json_full() {
        let config = TwosConfig::from_json(SAMPLE).unwrap();

        assert_eq!(config.settings.primary_wiki.as_deref(), Some("main"));

        let dev = config.server(Mode::Dev).unwrap();
        assert_eq!(dev.mode, Mode::Dev);
        assert!(dev.enabled);
        assert_eq!(dev.host, "127.0.0.1");
        assert_eq!(dev.port, 7357);
        assert_eq!(dev.log_level, "debug");
        assert_eq!(dev.pid_path, PathBuf::from("/tmp/oni"));

        let main = config.wikis.get("main").unwrap();
        assert_eq!(main.id, "main");
        assert_eq!(main.role, WikiRole::Primary);
        assert_eq!(main.scopes, vec!["public"]);
        assert!(main.https);
        assert!(main.auto_start);
    }

    #[test]
    fn test_server_defaults() {
        let config = TwosConfig::from_json(SAMPLE).unwrap();
        let prod = config.server(Mode::Prod).unwrap();

        assert!(!prod.enabled);
        assert_eq!(prod.host, "localhost");
        assert_eq!(prod.log_level, "info");
        assert_eq!(prod.log_path, None);
        assert_eq!(prod.pid_path, PathBuf::from("./pids"));
    }

    #[test]
    fn test_wiki_defaults_and_legacy_role() {
        let config = TwosConfig::from_json(SAMPLE).unwrap();
        let notes = config.wikis.get("notes").unwrap();

        assert_eq!(notes.role, WikiRole::Secondary);
        assert!(notes.scopes.is_empty());
        assert_eq!(notes.plugin_paths, vec![PathBuf::from("/srv/plugins")]);
        assert!(!notes.https);
        assert!(!notes.auto_start);
    }

    #[test]
    fn test_wiki_order_follows_document() {
        let config = TwosConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.wikis.keys().collect::<Vec<_>>(), vec!["main", "notes"]);
    }

    #[test]
    fn test_empty_document() {
        let config = TwosConfig::from_json("{}").unwrap();
        assert!(config.oni_servers.is_empty());
        assert!(config.wikis.is_empty());
        assert!(config.server(Mode::Dev).is_none());
    }

    #[test]
    fn test_missing_required_wiki_field() {
        let json = r#"{ "wikis": { "w": { "role": "primary", "twCoreVersion": "5.3.0", "rootPath": "/w", "host": "h" } } }"#;
        let err = TwosConfig::from_json(json).unwrap_err();

        match err {
            ConfigError::MissingField { section, key, field } => {
                assert_eq!(section, "wikis");
                assert_eq!(key, "w");
                assert_eq!(field, "port");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_server_port() {
        let err = TwosConfig::from_json(r#"{ "oniServers": { "dev": { "enabled": true } } }"#)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "oniServers.dev: missing required field \"port\""
        );
    }

    #[test]
    fn test_empty_host_counts_as_missing() {
        let json = r#"{ "wikis": { "w": { "role": "primary", "twCoreVersion": "5", "rootPath": "/w", "host": "", "port": 1 } } }"#;
        assert!(matches!(
            TwosConfig::from_json(json),
            Err(ConfigError::MissingField { field: "host", .. })
        ));
    }

    #[test]
    fn test_empty_wiki_id() {
        let json = r#"{ "wikis": { "": { "role": "primary", "twCoreVersion": "5", "rootPath": "/w", "host": "h", "port": 1 } } }"#;
        assert!(matches!(
            TwosConfig::from_json(json),
            Err(ConfigError::EmptyWikiId)
        ));
    }

    #[test]
    fn test_unknown_mode() {
        let err = TwosConfig::from_json(r#"{ "oniServers": { "staging": { "port": 1 } } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMode(ref m) if m == "staging"));
    }

    #[test]
    fn test_invalid_log_level() {
        let err = TwosConfig::from_json(
            r#"{ "oniServers": { "dev": { "port": 1, "logLevel": "loud" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel(ref l) if l == "loud"));
    }

    #[test]
    fn test_unknown_primary_wiki() {
        let err = TwosConfig::from_json(r#"{ "settings": { "masterWiki": "ghost" } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPrimaryWiki(ref w) if w == "ghost"));
    }

    #[test]
    fn test_malformed_json() {
        let err = TwosConfig::from_json(r#"{ "wikis": "#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().starts_with("invalid config JSON"));
    }

    #[test]
    fn test_wrong_type() {
        let err = TwosConfig::from_json(r#"{ "oniServers": { "dev": { "port": "high" } } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent.json");

        let err = TwosConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("absent.json"));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, SAMPLE).unwrap();

        let config = TwosConfig::load(&path).unwrap();
        assert_eq!(config.wikis.len(), 2);
        assert_eq!(config.oni_servers.len(), 2);
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::set_var("TWOS_LOG_LEVEL", "trace");

        let mut config = TwosConfig::from_json(SAMPLE).unwrap();
        config.apply_env_overrides();

        assert!(config.oni_servers.values().all(|s| s.log_level == "trace"));
        assert!(config.validate().is_ok());

        std::env::remove_var("TWOS_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_level_fails_validation() {
        std::env::set_var("TWOS_LOG_LEVEL", "chatty");

        let mut config = TwosConfig::from_json(SAMPLE).unwrap();
        config.apply_env_overrides();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel(_))
        ));

        std::env::remove_var("TWOS_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("TWOS_LOG_LEVEL", "");

        let mut config = TwosConfig::from_json(SAMPLE).unwrap();
        config.apply_env_overrides();
        assert_eq!(config.server(Mode::Dev).unwrap().log_level, "debug");

        std::env::remove_var("TWOS_LOG_LEVEL");
    }
}
