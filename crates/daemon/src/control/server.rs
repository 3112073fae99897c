//! Control-plane HTTP server.

use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use oni_protocol::{
    routes, ErrorResponse, HealthResponse, ShutdownResponse, StatusResponse, WikiStartedResponse,
    WikiStoppedResponse, WikisResponse,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::supervisor::{Supervisor, SupervisorError};

/// A listening control plane.
#[derive(Debug)]
pub struct ControlPlane {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<io::Result<()>>,
}

impl ControlPlane {
    /// Bind to `host:port` and start serving requests for `supervisor`.
    ///
    /// Port 0 lets the OS pick; the result is available from
    /// [`ControlPlane::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be resolved or the address is
    /// unavailable.
    pub async fn bind(host: &str, port: u16, supervisor: Supervisor) -> io::Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let app = router(supervisor);

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        info!(%local_addr, "control plane listening");
        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    ///
    /// Requests still running after `timeout` are aborted.
    pub async fn close(self, timeout: Duration) {
        self.shutdown.cancel();

        let mut task = self.task;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(()))) => info!(local_addr = %self.local_addr, "control plane closed"),
            Ok(Ok(Err(e))) => warn!(error = %e, "control plane exited with error"),
            Ok(Err(e)) => warn!(error = %e, "control plane task failed"),
            Err(_) => {
                warn!(?timeout, "control plane did not drain in time, aborting");
                task.abort();
                let _ = task.await;
            }
        }
    }
}

/// Build the route table for `supervisor`.
///
/// Unknown paths fall through to a JSON 404; each route answers other methods
/// with a JSON 405 naming the one it accepts.
pub fn router(supervisor: Supervisor) -> Router {
    Router::new()
        .route(routes::HEALTH, get(health).fallback(require_get))
        .route(routes::STATUS, get(status).fallback(require_get))
        .route(routes::WIKIS, get(list_wikis).fallback(require_get))
        .route(routes::WIKI_START, post(start_wiki).fallback(require_post))
        .route(routes::WIKI_STOP, post(stop_wiki).fallback(require_post))
        .route(routes::SHUTDOWN, post(shutdown).fallback(require_post))
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(supervisor)
}

/// An error response: a status code and an `{ok:false,error}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, body: ErrorResponse) -> Self {
        Self { status, body }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorResponse::new(message))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(message))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        error!(error = %err, "API handler error");
        Self::internal(err.to_string())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

type Params = Result<Query<HashMap<String, String>>, QueryRejection>;

/// The `id` query parameter. Absent and empty are the same.
fn require_id(params: Params) -> Result<String, ApiError> {
    let Query(mut params) = params?;
    params
        .remove(routes::ID_PARAM)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                ErrorResponse::missing_query_param(routes::ID_PARAM),
            )
        })
}

async fn health(State(supervisor): State<Supervisor>) -> Json<HealthResponse> {
    Json(HealthResponse::new(supervisor.mode()))
}

async fn status(State(supervisor): State<Supervisor>) -> Json<StatusResponse> {
    Json(supervisor.status())
}

async fn list_wikis(State(supervisor): State<Supervisor>) -> Json<WikisResponse> {
    Json(WikisResponse::new(supervisor.list_wikis()))
}

async fn start_wiki(
    State(supervisor): State<Supervisor>,
    params: Params,
) -> Result<Json<WikiStartedResponse>, ApiError> {
    let id = require_id(params)?;
    supervisor.start_wiki(&id)?;
    Ok(Json(WikiStartedResponse::new(id)))
}

async fn stop_wiki(
    State(supervisor): State<Supervisor>,
    params: Params,
) -> Result<Json<WikiStoppedResponse>, ApiError> {
    let id = require_id(params)?;
    supervisor.stop_wiki(&id)?;
    Ok(Json(WikiStoppedResponse::new(id)))
}

/// Acknowledge first; the teardown closes this very listener.
async fn shutdown(State(supervisor): State<Supervisor>) -> Json<ShutdownResponse> {
    tokio::spawn(async move {
        supervisor.shutdown("api").await;
    });
    Json(ShutdownResponse::default())
}

async fn require_get() -> ApiError {
    ApiError::new(
        StatusCode::METHOD_NOT_ALLOWED,
        ErrorResponse::method_not_allowed("GET"),
    )
}

async fn require_post() -> ApiError {
    ApiError::new(
        StatusCode::METHOD_NOT_ALLOWED,
        ErrorResponse::method_not_allowed("POST"),
    )
}

async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, ErrorResponse::not_found())
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "handler panicked".to_string()
    };
    error!(%message, "API handler panicked");
    ApiError::internal(message).into_response()
}
