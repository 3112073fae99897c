//! Control-plane HTTP client used by the `twos` subcommands.

use std::time::Duration;

use oni_protocol::{
    routes, ErrorResponse, HealthResponse, ShutdownResponse, StatusResponse, WikiStartedResponse,
    WikiStoppedResponse, WikisResponse,
};
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::base_url;

/// Default timeout for client requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Errors returned by [`ControlClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    /// The request could not be sent or the body could not be read
    /// (connection refused, timeout, ...).
    #[error("{method} {path} failed: {source}")]
    Http {
        method: Method,
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-2xx status.
    #[error("{method} {path} returned HTTP {status}: {body}")]
    Status {
        status: u16,
        method: Method,
        path: String,
        body: String,
    },

    /// The server answered 2xx but the body is not the expected JSON.
    #[error("{method} {path} returned invalid JSON: {source}")]
    Parse {
        method: Method,
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ClientError {
    /// The `error` message of a JSON error body, if the server sent one.
    pub fn server_message(&self) -> Option<String> {
        match self {
            Self::Status { body, .. } => serde_json::from_str::<ErrorResponse>(body)
                .ok()
                .map(|err| err.error),
            _ => None,
        }
    }

    /// Returns `true` if nothing answered at the target address.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Http { source, .. } if source.is_connect() || source.is_timeout())
    }
}

/// A client for one supervisor's control plane.
#[derive(Debug, Clone)]
pub struct ControlClient {
    http: reqwest::Client,
    base_url: String,
}

impl ControlClient {
    /// Create a client for the control plane at `host:port` with the default
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Build`] if the HTTP client cannot be set up.
    pub fn new(host: &str, port: u16) -> Result<Self, ClientError> {
        Self::with_timeout(host, port, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a client with a custom per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Build`] if the HTTP client cannot be set up.
    pub fn with_timeout(host: &str, port: u16, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self {
            http,
            base_url: base_url(host, port),
        })
    }

    /// The `http://host:port` prefix requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a GET and decode the JSON response.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Http`] if the request fails in transport
    /// - [`ClientError::Status`] if the server answers non-2xx
    /// - [`ClientError::Parse`] if a 2xx body is not valid JSON for `T`
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        self.request::<T, ()>(Method::GET, path, query, None).await
    }

    /// Send a POST, with an optional JSON body, and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Same as [`ControlClient::get_json`].
    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T, ClientError> {
        self.request(Method::POST, path, query, body).await
    }

    async fn request<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T, ClientError> {
        let display_path = display_path(path, query);
        debug!(%method, path = %display_path, "control request");

        let mut request = self
            .http
            .request(method.clone(), format!("{}{}", self.base_url, path))
            .header(ACCEPT, "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let http_error = |source| ClientError::Http {
            method: method.clone(),
            path: display_path.clone(),
            source,
        };
        let response = request.send().await.map_err(http_error)?;
        let status = response.status();
        let text = response.text().await.map_err(http_error)?;

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                method,
                path: display_path,
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|source| ClientError::Parse {
            method,
            path: display_path,
            source,
        })
    }

    /// `GET /api/health`
    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.get_json(routes::HEALTH, &[]).await
    }

    /// `GET /api/status`
    pub async fn status(&self) -> Result<StatusResponse, ClientError> {
        self.get_json(routes::STATUS, &[]).await
    }

    /// `GET /api/wikis`
    pub async fn wikis(&self) -> Result<WikisResponse, ClientError> {
        self.get_json(routes::WIKIS, &[]).await
    }

    /// `POST /api/wiki/start?id=<id>`
    pub async fn start_wiki(&self, id: &str) -> Result<WikiStartedResponse, ClientError> {
        self.post_json::<_, ()>(routes::WIKI_START, &[(routes::ID_PARAM, id)], None)
            .await
    }

    /// `POST /api/wiki/stop?id=<id>`
    pub async fn stop_wiki(&self, id: &str) -> Result<WikiStoppedResponse, ClientError> {
        self.post_json::<_, ()>(routes::WIKI_STOP, &[(routes::ID_PARAM, id)], None)
            .await
    }

    /// `POST /api/shutdown`
    pub async fn shutdown(&self) -> Result<ShutdownResponse, ClientError> {
        self.post_json::<_, ()>(routes::SHUTDOWN, &[], None).await
    }
}

fn display_path(path: &str, query: &[(&str, &str)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    let query: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{path}?{}", query.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one connection with a canned HTTP response; returns the port
    /// and a handle yielding the raw request head.
    async fn one_shot(status_line: &'static str, body: &'static str) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
            String::from_utf8_lossy(&buf).into_owned()
        });

        (port, handle)
    }

    #[test]
    fn test_display_path() {
        assert_eq!(display_path("/api/status", &[]), "/api/status");
        assert_eq!(
            display_path("/api/wiki/start", &[("id", "alpha")]),
            "/api/wiki/start?id=alpha"
        );
    }

    #[tokio::test]
    async fn test_health_decodes() {
        let (port, server) =
            one_shot("200 OK", r#"{"ok":true,"status":"healthy","mode":"prod"}"#).await;

        let client = ControlClient::new("127.0.0.1", port).unwrap();
        let health = client.health().await.unwrap();
        assert!(health.ok);
        assert_eq!(health.mode, oni_protocol::Mode::Prod);

        let head = server.await.unwrap();
        assert!(head.starts_with("GET /api/health HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_start_wiki_sends_id_query() {
        let (port, server) = one_shot("200 OK", r#"{"ok":true,"started":"alpha"}"#).await;

        let client = ControlClient::new("127.0.0.1", port).unwrap();
        let started = client.start_wiki("alpha").await.unwrap();
        assert_eq!(started.started, "alpha");

        let head = server.await.unwrap();
        assert!(head.starts_with("POST /api/wiki/start?id=alpha HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_non_2xx_is_status_error() {
        let (port, _server) = one_shot(
            "500 Internal Server Error",
            r#"{"ok":false,"error":"Unknown wiki: missing"}"#,
        )
        .await;

        let client = ControlClient::new("127.0.0.1", port).unwrap();
        let err = client.stop_wiki("missing").await.unwrap_err();

        match &err {
            ClientError::Status {
                status,
                method,
                path,
                body,
            } => {
                assert_eq!(*status, 500);
                assert_eq!(*method, Method::POST);
                assert_eq!(path, "/api/wiki/stop?id=missing");
                assert!(body.contains("Unknown wiki: missing"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.server_message().as_deref(), Some("Unknown wiki: missing"));
        assert!(!err.is_unreachable());
    }

    #[tokio::test]
    async fn test_invalid_json_is_parse_error() {
        let (port, _server) = one_shot("200 OK", "not json").await;

        let client = ControlClient::new("127.0.0.1", port).unwrap();
        let err = client.status().await.unwrap_err();
        assert!(matches!(err, ClientError::Parse { .. }), "got {err}");
        assert!(err.server_message().is_none());
    }

    #[tokio::test]
    async fn test_connection_refused_is_http_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let client = ControlClient::new("127.0.0.1", port).unwrap();
        let err = client.health().await.unwrap_err();
        assert!(matches!(err, ClientError::Http { .. }), "got {err}");
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let client =
            ControlClient::with_timeout("127.0.0.1", port, Duration::from_millis(100)).unwrap();
        let err = client.health().await.unwrap_err();
        assert!(err.is_unreachable(), "got {err}");
    }
}
