//! Relay session lifecycle state
//!
//! ```text
//! Init -> PodCreating -> PodReady -> Serving -> Draining -> Terminated
//!             |              |
//!             +--------------+------------------------------> Terminated
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::Mutex;

use tokio::sync::watch;
use tracing::{debug, warn};

/// Lifecycle state of a relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Init,
    PodCreating,
    PodReady,
    Serving,
    Draining,
    Terminated,
}

impl SessionState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Init, PodCreating)
                | (Init, Terminated)
                | (PodCreating, PodReady)
                | (PodCreating, Terminated)
                | (PodReady, Serving)
                | (PodReady, Terminated)
                | (Serving, Draining)
                | (Draining, Terminated)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Init => "init",
            SessionState::PodCreating => "pod-creating",
            SessionState::PodReady => "pod-ready",
            SessionState::Serving => "serving",
            SessionState::Draining => "draining",
            SessionState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a session, published to observers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub pod_name: Option<String>,
    pub pod_phase: Option<String>,
    pub local_addr: Option<SocketAddr>,
}

/// Summary returned when a session ends cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub pod_name: Option<String>,
    /// Every state the session passed through, in order
    pub transitions: Vec<SessionState>,
    /// Local connections accepted while serving
    pub accepted: u64,
    /// Connections still open after the grace period
    pub forced_closed: usize,
}

/// Mutable state of one relay session, owned by the controller
#[derive(Debug)]
pub struct RelaySession {
    snapshot: watch::Sender<SessionSnapshot>,
    history: Mutex<Vec<SessionState>>,
}

impl Default for RelaySession {
    fn default() -> Self {
        Self::new()
    }
}

impl RelaySession {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            snapshot,
            history: Mutex::new(vec![SessionState::Init]),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    /// Move to `next`. Illegal transitions are refused and logged.
    pub fn transition(&self, next: SessionState) -> bool {
        let current = self.state();
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "Refusing illegal session transition");
            return false;
        }
        debug!(from = %current, to = %next, "Session transition");
        self.snapshot.send_modify(|s| s.state = next);
        if let Ok(mut history) = self.history.lock() {
            history.push(next);
        }
        true
    }

    pub fn set_pod(&self, name: &str, phase: Option<&str>) {
        self.snapshot.send_modify(|s| {
            s.pod_name = Some(name.to_string());
            s.pod_phase = phase.map(String::from);
        });
    }

    pub fn set_local_addr(&self, addr: SocketAddr) {
        self.snapshot.send_modify(|s| s.local_addr = Some(addr));
    }

    pub fn clear_local_addr(&self) {
        self.snapshot.send_modify(|s| s.local_addr = None);
    }

    pub fn history(&self) -> Vec<SessionState> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_happy_path_transitions() {
        let session = RelaySession::new();
        for next in [PodCreating, PodReady, Serving, Draining, Terminated] {
            assert!(session.transition(next), "transition to {} refused", next);
        }
        assert_eq!(session.history(), vec![Init, PodCreating, PodReady, Serving, Draining, Terminated]);
    }

    #[test]
    fn test_error_path_skips_to_terminated() {
        let session = RelaySession::new();
        assert!(session.transition(PodCreating));
        assert!(session.transition(Terminated));
        assert_eq!(session.state(), Terminated);
    }

    #[test]
    fn test_illegal_transitions_are_refused() {
        let session = RelaySession::new();
        assert!(!session.transition(Serving));
        assert!(session.transition(PodCreating));
        assert!(!session.transition(Draining));
        assert_eq!(session.state(), PodCreating);
        assert!(!Terminated.can_transition_to(PodCreating));
        assert!(!Serving.can_transition_to(Terminated));
    }

    #[test]
    fn test_subscribers_see_updates() {
        let session = RelaySession::new();
        let rx = session.subscribe();
        session.transition(PodCreating);
        session.set_pod("socat-abc", Some("Pending"));
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.state, PodCreating);
        assert_eq!(snapshot.pod_name.as_deref(), Some("socat-abc"));
        assert_eq!(snapshot.pod_phase.as_deref(), Some("Pending"));
    }
}
