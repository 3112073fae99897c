//! Process signal hooks owned by a supervisor instance.
//!
//! SIGINT and SIGTERM are forwarded to a callback (the supervisor's shutdown)
//! from a background task. The hooks belong to the instance that installed
//! them: [`SignalHooks::disarm`] makes them inert, so several supervisors can
//! be created and torn down in one process without interfering.

use std::future::Future;
use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Handle to an installed pair of SIGINT/SIGTERM listeners.
#[derive(Debug)]
pub struct SignalHooks {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SignalHooks {
    /// Start listening for SIGINT and SIGTERM.
    ///
    /// `on_signal` receives the signal name (`"SIGINT"` or `"SIGTERM"`) and
    /// is awaited before the next signal is handled.
    ///
    /// # Errors
    ///
    /// Returns an error if signal registration fails.
    pub fn install<F, Fut>(on_signal: F) -> io::Result<Self>
    where
        F: Fn(&'static str) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let token = CancellationToken::new();
        let cancelled = token.clone();

        let task = tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    _ = cancelled.cancelled() => break,
                    Some(()) = sigint.recv() => "SIGINT",
                    Some(()) = sigterm.recv() => "SIGTERM",
                    else => break,
                };

                info!(signal = name, "received signal, initiating shutdown");
                on_signal(name).await;
            }
            debug!("signal hooks disarmed");
        });

        Ok(Self { token, task })
    }

    /// Stop forwarding signals. Safe to call from inside the callback.
    pub fn disarm(&self) {
        self.token.cancel();
    }

    /// Returns `true` once the listener task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_disarm_stops_listener() {
        let hooks = SignalHooks::install(|_| async {}).unwrap();
        assert!(!hooks.is_finished());

        hooks.disarm();

        tokio::time::timeout(Duration::from_secs(2), async {
            while !hooks.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("listener task should exit after disarm");
    }

    #[tokio::test]
    async fn test_sigterm_invokes_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let hooks = SignalHooks::install(move |name| {
            let seen = Arc::clone(&seen);
            async move {
                assert_eq!(name, "SIGTERM");
                seen.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        nix::sys::signal::raise(nix::sys::signal::Signal::SIGTERM).unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("callback should run after SIGTERM");

        hooks.disarm();
    }
}
