//! The supervisor: owns the wiki runtimes, the control plane, the PID lock
//! and the signal hooks for one mode.
//!
//! [`Supervisor`] is a cheap handle (`Arc` inside). Control-plane handlers and
//! signal hooks hold clones of it, so every entry point funnels into the same
//! [`Supervisor::shutdown`], which runs its teardown sequence at most once.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use oni_protocol::{Entries, Mode, StatusResponse, WikiStatus};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, ServerConfig, TwosConfig};
use crate::control::ControlPlane;
use crate::pidfile::{LockError, PidLock};
use crate::signals::SignalHooks;
use crate::wiki::WikiRuntime;

/// How long shutdown waits for in-flight control-plane requests.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced by supervisor operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The mode has no `oniServers` entry, or the entry is not enabled.
    #[error("Oni server mode \"{0}\" is disabled or missing in config.")]
    ModeDisabled(Mode),

    /// The PID lock could not be taken.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The control plane could not bind its listener.
    #[error("failed to bind control plane on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// SIGINT/SIGTERM handlers could not be registered.
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    /// No wiki with that id is configured.
    #[error("Unknown wiki: {0}")]
    UnknownWiki(String),
}

impl SupervisorError {
    /// Returns `true` if another supervisor already holds the mode's lock.
    pub fn is_already_running(&self) -> bool {
        matches!(self, Self::Lock(LockError::AlreadyRunning { .. }))
    }
}

/// Tunables for [`Supervisor::start_with`].
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Upper bound on graceful control-plane shutdown before in-flight
    /// requests are aborted.
    pub close_timeout: Duration,
    /// Route SIGINT/SIGTERM to [`Supervisor::shutdown`].
    pub handle_signals: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            handle_signals: true,
        }
    }
}

struct Inner {
    mode: Mode,
    config: TwosConfig,
    server: ServerConfig,
    wikis: Entries<WikiRuntime>,
    started_at: Instant,
    close_timeout: Duration,
    local_addr: OnceLock<SocketAddr>,
    shutting_down: AtomicBool,
    control: Mutex<Option<ControlPlane>>,
    lock: Mutex<Option<PidLock>>,
    signals: Mutex<Option<SignalHooks>>,
    /// Cancelled when `start_with` returns, successfully or not.
    ready: CancellationToken,
    terminated: CancellationToken,
}

/// Handle to a running supervisor.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("mode", &self.inner.mode)
            .field("local_addr", &self.local_addr())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Start a supervisor for `mode` with default options.
    ///
    /// See [`Supervisor::start_with`].
    pub async fn start(mode: Mode, config: TwosConfig) -> Result<Self, SupervisorError> {
        Self::start_with(mode, config, SupervisorOptions::default()).await
    }

    /// Load the config file at `path`, apply environment overrides, and start.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::Config`] if the file cannot be loaded, otherwise the
    /// same errors as [`Supervisor::start_with`].
    pub async fn start_from_file(mode: Mode, path: &Path) -> Result<Self, SupervisorError> {
        let mut config = TwosConfig::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Self::start(mode, config).await
    }

    /// Bring the supervisor up:
    ///
    /// 1. resolve the `oniServers` entry for `mode`, which must be enabled
    /// 2. take the PID lock under the entry's `pidPath`
    /// 3. build a `stopped` runtime for every configured wiki
    /// 4. bind the control plane on the entry's host and port
    /// 5. install signal hooks
    /// 6. request a start for every wiki with `autoStart`
    ///
    /// If a step after the lock fails, the lock is released before the error
    /// is returned. A shutdown requested while these steps run (from the API
    /// or a signal) waits for them to finish, then tears everything down.
    ///
    /// # Errors
    ///
    /// - [`SupervisorError::ModeDisabled`] if step 1 fails
    /// - [`SupervisorError::Lock`] if another live supervisor holds the lock
    ///   or the PID file cannot be written
    /// - [`SupervisorError::Bind`] if the listener cannot be bound
    /// - [`SupervisorError::Signals`] if signal registration fails
    pub async fn start_with(
        mode: Mode,
        config: TwosConfig,
        options: SupervisorOptions,
    ) -> Result<Self, SupervisorError> {
        let server = config
            .server(mode)
            .filter(|server| server.enabled)
            .cloned()
            .ok_or(SupervisorError::ModeDisabled(mode))?;

        let lock = PidLock::acquire(&server.pid_path, mode)?;

        let wikis: Entries<WikiRuntime> = config
            .wikis
            .iter()
            .map(|(id, wiki)| (id, WikiRuntime::new(wiki.clone())))
            .collect();

        let supervisor = Self {
            inner: Arc::new(Inner {
                mode,
                config,
                server,
                wikis,
                started_at: Instant::now(),
                close_timeout: options.close_timeout,
                local_addr: OnceLock::new(),
                shutting_down: AtomicBool::new(false),
                control: Mutex::new(None),
                lock: Mutex::new(None),
                signals: Mutex::new(None),
                ready: CancellationToken::new(),
                terminated: CancellationToken::new(),
            }),
        };
        let _ready = supervisor.inner.ready.clone().drop_guard();

        let host = supervisor.inner.server.host.clone();
        let port = supervisor.inner.server.port;
        let control = match ControlPlane::bind(&host, port, supervisor.clone()).await {
            Ok(control) => control,
            Err(source) => {
                error!(%host, port, error = %source, "control plane failed to bind");
                lock.release();
                return Err(SupervisorError::Bind {
                    addr: format!("{host}:{port}"),
                    source,
                });
            }
        };
        let local_addr = control.local_addr();
        let _ = supervisor.inner.local_addr.set(local_addr);
        *supervisor.inner.control.lock().await = Some(control);

        let signals = if options.handle_signals {
            let weak = Arc::downgrade(&supervisor.inner);
            let installed = SignalHooks::install(move |name| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        Supervisor { inner }.shutdown(name).await;
                    }
                }
            });
            match installed {
                Ok(hooks) => Some(hooks),
                Err(e) => {
                    error!(error = %e, "failed to install signal handlers");
                    let control = supervisor.inner.control.lock().await.take();
                    if let Some(control) = control {
                        control.close(options.close_timeout).await;
                    }
                    lock.release();
                    return Err(SupervisorError::Signals(e));
                }
            }
        } else {
            None
        };

        *supervisor.inner.lock.lock().await = Some(lock);
        *supervisor.inner.signals.lock().await = signals;

        info!(
            %mode,
            pid = std::process::id(),
            "Started. Listening on {}:{}",
            host,
            local_addr.port()
        );

        supervisor.run_autostart();
        Ok(supervisor)
    }

    /// The mode this supervisor runs in.
    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    /// The configuration the supervisor was started with.
    pub fn config(&self) -> &TwosConfig {
        &self.inner.config
    }

    /// The `oniServers` entry for this mode.
    pub fn server_config(&self) -> &ServerConfig {
        &self.inner.server
    }

    /// Address the control plane is bound to. Resolves port 0 to the port
    /// the OS picked.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    /// Look up a wiki runtime, e.g. for a spawner to report state changes.
    pub fn wiki(&self, id: &str) -> Option<&WikiRuntime> {
        self.inner.wikis.get(id)
    }

    /// Returns `true` once shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Time since startup.
    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    /// Supervisor-wide status snapshot.
    pub fn status(&self) -> StatusResponse {
        let port = self
            .local_addr()
            .map_or(self.inner.server.port, |addr| addr.port());

        StatusResponse {
            ok: true,
            mode: self.inner.mode,
            pid: std::process::id(),
            uptime_ms: u64::try_from(self.uptime().as_millis()).unwrap_or(u64::MAX),
            host: self.inner.server.host.clone(),
            port,
            shutting_down: self.is_shutting_down(),
            wikis: self.list_wikis(),
        }
    }

    /// Status of every configured wiki, in configuration order.
    pub fn list_wikis(&self) -> Entries<WikiStatus> {
        self.inner
            .wikis
            .iter()
            .map(|(id, runtime)| (id, runtime.status()))
            .collect()
    }

    /// Request a start for wiki `id`. Repeated requests are no-ops.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::UnknownWiki`] if `id` is not configured.
    pub fn start_wiki(&self, id: &str) -> Result<(), SupervisorError> {
        let runtime = self.require_wiki(id)?;
        if runtime.request_start() {
            info!(wiki = id, "Wiki start requested");
        } else {
            debug!(wiki = id, state = %runtime.state(), "wiki start ignored");
        }
        Ok(())
    }

    /// Request a stop for wiki `id`. Repeated requests are no-ops.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::UnknownWiki`] if `id` is not configured.
    pub fn stop_wiki(&self, id: &str) -> Result<(), SupervisorError> {
        let runtime = self.require_wiki(id)?;
        if runtime.request_stop() {
            info!(wiki = id, "Wiki stop requested");
        } else {
            debug!(wiki = id, state = %runtime.state(), "wiki stop ignored");
        }
        Ok(())
    }

    /// Request a start for every wiki with `autoStart` set, in configuration
    /// order. Failures are logged and do not stop the sweep. Runs once, from
    /// `start_with`.
    fn run_autostart(&self) {
        for runtime in self.inner.wikis.values() {
            if !runtime.config().auto_start {
                continue;
            }
            if let Err(e) = self.start_wiki(runtime.id()) {
                warn!(wiki = runtime.id(), error = %e, "autostart failed");
            }
        }
    }

    /// Tear the supervisor down. Only the first call does any work; later
    /// calls return immediately.
    ///
    /// In order: stop every wiki (best effort), close the control plane
    /// (waiting up to the close timeout for in-flight requests), release the
    /// PID lock, disarm the signal hooks, then resolve [`Supervisor::wait`].
    ///
    /// Called while startup is still running, the teardown begins once
    /// startup has finished.
    pub async fn shutdown(&self, reason: &str) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            debug!(reason, "shutdown already in progress");
            return;
        }
        warn!(reason, "Shutdown requested");

        if !self.inner.ready.is_cancelled() {
            debug!("waiting for startup to finish");
            self.inner.ready.cancelled().await;
        }

        for id in self.inner.wikis.keys() {
            if let Err(e) = self.stop_wiki(id) {
                warn!(wiki = id, error = %e, "failed to stop wiki during shutdown");
            }
        }

        let control = self.inner.control.lock().await.take();
        if let Some(control) = control {
            control.close(self.inner.close_timeout).await;
        }

        let lock = self.inner.lock.lock().await.take();
        if let Some(lock) = lock {
            lock.release();
        }

        let signals = self.inner.signals.lock().await.take();
        if let Some(signals) = signals {
            signals.disarm();
        }

        info!("Shutdown complete");
        self.inner.terminated.cancel();
    }

    /// Resolves once [`Supervisor::shutdown`] has finished.
    pub async fn wait(&self) {
        self.inner.terminated.cancelled().await;
    }

    fn require_wiki(&self, id: &str) -> Result<&WikiRuntime, SupervisorError> {
        self.inner
            .wikis
            .get(id)
            .ok_or_else(|| SupervisorError::UnknownWiki(id.to_string()))
    }
}
