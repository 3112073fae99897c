//! Per-wiki lifecycle state machine.
//!
//! A [`WikiRuntime`] tracks what the supervisor believes about one wiki
//! process:
//!
//! ```text
//!            request_start              mark_running
//!  stopped ───────────────▶ starting ───────────────▶ running
//!     ▲                        │                         │
//!     │ mark_stopped           │ request_stop            │ request_stop
//!     │                        ▼                         │
//!  stopping ◀──────────────────┴─────────────────────────┘
//!
//!  mark_error: any ──▶ error     (error accepts request_start and request_stop)
//! ```
//!
//! Every `(state, event)` pair outside the diagram is a no-op rather than an
//! error: duplicate start or stop requests racing over the control plane are
//! expected. `request_*` are driven by the supervisor; `mark_*` are the
//! callbacks a process spawner reports back through once it observes the
//! real process reach that condition.

use std::sync::{Mutex, MutexGuard, PoisonError};

use oni_protocol::{WikiState, WikiStatus};
use tracing::debug;

use crate::config::WikiConfig;

/// Runtime view of one configured wiki.
#[derive(Debug)]
pub struct WikiRuntime {
    config: WikiConfig,
    state: Mutex<WikiState>,
}

impl WikiRuntime {
    /// Create a runtime in the `stopped` state; no process exists yet when
    /// the supervisor builds it.
    pub fn new(config: WikiConfig) -> Self {
        Self {
            config,
            state: Mutex::new(WikiState::Stopped),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &WikiConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WikiState {
        *self.lock_state()
    }

    /// Ask for the wiki to start. Returns `true` if the state changed.
    pub fn request_start(&self) -> bool {
        self.transition("request_start", |state| match state {
            WikiState::Stopped | WikiState::Error => Some(WikiState::Starting),
            _ => None,
        })
    }

    /// Ask for the wiki to stop. Returns `true` if the state changed.
    pub fn request_stop(&self) -> bool {
        self.transition("request_stop", |state| match state {
            WikiState::Running | WikiState::Starting | WikiState::Error => {
                Some(WikiState::Stopping)
            }
            _ => None,
        })
    }

    /// The process was confirmed healthy.
    pub fn mark_running(&self) -> bool {
        self.transition("mark_running", |state| match state {
            WikiState::Starting => Some(WikiState::Running),
            _ => None,
        })
    }

    /// The process was confirmed gone.
    pub fn mark_stopped(&self) -> bool {
        self.transition("mark_stopped", |state| match state {
            WikiState::Stopping => Some(WikiState::Stopped),
            _ => None,
        })
    }

    /// A start or stop attempt failed, or the process crashed.
    pub fn mark_error(&self) -> bool {
        self.transition("mark_error", |_| Some(WikiState::Error))
    }

    /// Owned snapshot of the wiki's config and current state.
    pub fn status(&self) -> WikiStatus {
        WikiStatus {
            id: self.config.id.clone(),
            role: self.config.role,
            scopes: self.config.scopes.clone(),
            core_version: self.config.core_version.clone(),
            root_path: self.config.root_path.clone(),
            plugin_paths: self.config.plugin_paths.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            https: self.config.https,
            state: self.state(),
        }
    }

    fn transition(
        &self,
        event: &'static str,
        next: impl FnOnce(WikiState) -> Option<WikiState>,
    ) -> bool {
        let mut state = self.lock_state();
        let from = *state;
        match next(from) {
            Some(to) if to != from => {
                debug!(wiki = %self.config.id, event, %from, %to, "wiki state changed");
                *state = to;
                true
            }
            _ => false,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, WikiState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use oni_protocol::WikiRole;

    use super::*;

    pub(crate) fn wiki_config(id: &str, auto_start: bool) -> WikiConfig {
        WikiConfig {
            id: id.to_string(),
            role: WikiRole::Secondary,
            scopes: vec!["docs".to_string()],
            core_version: "5.3.0".to_string(),
            root_path: PathBuf::from(format!("/srv/wikis/{id}")),
            plugin_paths: vec![],
            https: false,
            host: "127.0.0.1".to_string(),
            port: 8080,
            auto_start,
        }
    }

    fn runtime_in(state: WikiState) -> WikiRuntime {
        let rt = WikiRuntime::new(wiki_config("alpha", false));
        match state {
            WikiState::Stopped => {}
            WikiState::Starting => {
                rt.request_start();
            }
            WikiState::Running => {
                rt.request_start();
                rt.mark_running();
            }
            WikiState::Stopping => {
                rt.request_start();
                rt.request_stop();
            }
            WikiState::Error => {
                rt.mark_error();
            }
        }
        assert_eq!(rt.state(), state);
        rt
    }

    const ALL: [WikiState; 5] = [
        WikiState::Stopped,
        WikiState::Starting,
        WikiState::Running,
        WikiState::Stopping,
        WikiState::Error,
    ];

    #[test]
    fn test_initial_state_is_stopped() {
        let rt = WikiRuntime::new(wiki_config("alpha", false));
        assert_eq!(rt.state(), WikiState::Stopped);
        assert_eq!(rt.id(), "alpha");
    }

    #[test]
    fn test_request_start_is_idempotent() {
        let rt = WikiRuntime::new(wiki_config("alpha", false));

        assert!(rt.request_start());
        for _ in 0..10 {
            assert!(!rt.request_start());
            assert_eq!(rt.state(), WikiState::Starting);
        }

        assert!(rt.mark_running());
        assert!(!rt.request_start());
        assert_eq!(rt.state(), WikiState::Running);
    }

    #[test]
    fn test_request_start_table() {
        for from in ALL {
            let rt = runtime_in(from);
            rt.request_start();
            let expected = match from {
                WikiState::Stopped | WikiState::Error => WikiState::Starting,
                other => other,
            };
            assert_eq!(rt.state(), expected, "request_start from {from}");
        }
    }

    #[test]
    fn test_request_stop_table() {
        for from in ALL {
            let rt = runtime_in(from);
            let changed = rt.request_stop();
            let expected = match from {
                WikiState::Running | WikiState::Starting | WikiState::Error => {
                    WikiState::Stopping
                }
                other => other,
            };
            assert_eq!(rt.state(), expected, "request_stop from {from}");
            assert_eq!(changed, expected != from);
        }
    }

    #[test]
    fn test_mark_running_only_from_starting() {
        for from in ALL {
            let rt = runtime_in(from);
            rt.mark_running();
            let expected = if from == WikiState::Starting {
                WikiState::Running
            } else {
                from
            };
            assert_eq!(rt.state(), expected, "mark_running from {from}");
        }
    }

    #[test]
    fn test_mark_stopped_only_from_stopping() {
        for from in ALL {
            let rt = runtime_in(from);
            rt.mark_stopped();
            let expected = if from == WikiState::Stopping {
                WikiState::Stopped
            } else {
                from
            };
            assert_eq!(rt.state(), expected, "mark_stopped from {from}");
        }
    }

    #[test]
    fn test_mark_error_from_any() {
        for from in ALL {
            let rt = runtime_in(from);
            rt.mark_error();
            assert_eq!(rt.state(), WikiState::Error, "mark_error from {from}");
        }
    }

    #[test]
    fn test_stop_racing_mark_running_never_sticks() {
        let rt = runtime_in(WikiState::Starting);

        rt.mark_running();
        rt.request_stop();
        assert_eq!(rt.state(), WikiState::Stopping);

        let rt = runtime_in(WikiState::Starting);
        rt.request_stop();
        // A late health report after the stop request is ignored.
        assert!(!rt.mark_running());
        assert_eq!(rt.state(), WikiState::Stopping);
    }

    #[test]
    fn test_full_cycle() {
        let rt = WikiRuntime::new(wiki_config("alpha", false));
        assert!(rt.request_start());
        assert!(rt.mark_running());
        assert!(rt.request_stop());
        assert!(rt.mark_stopped());
        assert_eq!(rt.state(), WikiState::Stopped);
        assert!(rt.request_start());
    }

    #[test]
    fn test_status_is_a_snapshot() {
        let rt = WikiRuntime::new(wiki_config("alpha", false));
        let before = rt.status();

        rt.request_start();

        assert_eq!(before.state, WikiState::Stopped);
        assert_eq!(rt.status().state, WikiState::Starting);
        assert_eq!(before.id, "alpha");
        assert_eq!(before.core_version, "5.3.0");
        assert_eq!(before.root_path, PathBuf::from("/srv/wikis/alpha"));
    }

    #[test]
    fn test_concurrent_starts_change_state_once() {
        let rt = Arc::new(WikiRuntime::new(wiki_config("alpha", false)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rt = Arc::clone(&rt);
                std::thread::spawn(move || rt.request_start())
            })
            .collect();
        let changed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|changed| *changed)
            .count();

        assert_eq!(changed, 1);
        assert_eq!(rt.state(), WikiState::Starting);
    }
}
