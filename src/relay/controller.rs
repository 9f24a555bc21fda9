//! Lifecycle controller
//!
//! Drives one session through pod creation, tunnel setup, serving and
//! teardown. Whatever path ends the session, a created relay pod is deleted
//! exactly once before `run` returns.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::errors::{Result, SocatError};
use crate::relay::pump::{self, RelayServer, ServeExit};
use crate::relay::session::{RelaySession, SessionReport, SessionSnapshot, SessionState};
use crate::relay::stream::{PodHandle, RelayPods, TunnelConnector};
use crate::relay::RelaySpec;

/// Timing knobs of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub ready_timeout: Duration,
    pub grace_period: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(60),
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Result of the phase between pod creation and teardown
struct Served {
    accepted: u64,
    forced_closed: usize,
}

pub struct RelayController {
    pods: Arc<dyn RelayPods>,
    tunnels: Arc<dyn TunnelConnector>,
    options: SessionOptions,
    session: RelaySession,
}

impl RelayController {
    pub fn new(pods: Arc<dyn RelayPods>, tunnels: Arc<dyn TunnelConnector>, options: SessionOptions) -> Self {
        Self {
            pods,
            tunnels,
            options,
            session: RelaySession::new(),
        }
    }

    /// Observe state changes of the session
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.session.subscribe()
    }

    /// Run one session until `cancel` fires or a fatal error occurs.
    ///
    /// Cancellation is a clean exit and yields `Ok`.
    #[instrument(skip_all, fields(pod = %spec.pod_name, namespace = %spec.namespace))]
    pub async fn run(&self, spec: &RelaySpec, cancel: CancellationToken) -> Result<SessionReport> {
        self.session.transition(SessionState::PodCreating);
        info!(image = %spec.pod.image, target = %spec.target.remote_addr(), "Creating relay pod");

        // Not raced against cancellation: a pod created after we stopped
        // waiting would never be deleted.
        let pod = match self.pods.create(spec).await {
            Ok(pod) => pod,
            Err(e) => {
                self.session.transition(SessionState::Terminated);
                return Err(e);
            }
        };
        self.session.set_pod(&pod.name, None);
        info!(pod = %pod, "Created relay pod");

        let served = self.run_with_pod(spec, &pod, &cancel).await;

        if self.session.state() == SessionState::Serving {
            self.session.transition(SessionState::Draining);
        }
        info!(pod = %pod, "Deleting relay pod");
        self.pods.delete(&pod).await;
        self.session.transition(SessionState::Terminated);

        let served = served?;
        Ok(SessionReport {
            pod_name: Some(pod.name),
            transitions: self.session.history(),
            accepted: served.accepted,
            forced_closed: served.forced_closed,
        })
    }

    async fn run_with_pod(&self, spec: &RelaySpec, pod: &PodHandle, cancel: &CancellationToken) -> Result<Served> {
        let nothing_served = Served { accepted: 0, forced_closed: 0 };

        tokio::select! {
            ready = self.pods.wait_ready(pod, self.options.ready_timeout) => ready?,
            _ = cancel.cancelled() => {
                info!("Cancelled while waiting for the relay pod");
                return Ok(nothing_served);
            }
        }
        self.session.set_pod(&pod.name, Some("Running"));
        self.session.transition(SessionState::PodReady);
        info!(pod = %pod, "Relay pod is running");

        let factory = tokio::select! {
            factory = self.tunnels.open_tunnel(pod, spec.pod.relay_port) => factory?,
            _ = cancel.cancelled() => {
                info!("Cancelled while opening the tunnel");
                return Ok(nothing_served);
            }
        };

        let local_addr = spec.local_addr();
        let listener = match TcpListener::bind(local_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                factory.close();
                return Err(SocatError::Io(io::Error::new(
                    e.kind(),
                    format!("could not listen on {}: {}", local_addr, e),
                )));
            }
        };
        let bound = listener.local_addr()?;
        self.session.set_local_addr(bound);
        self.session.transition(SessionState::Serving);
        info!("Forwarding from {} -> {} via {}", bound, spec.target.remote_addr(), pod);

        let logs_stop = CancellationToken::new();
        let pods = Arc::clone(&self.pods);
        let log_pod = pod.clone();
        let log_task = tokio::spawn({
            let stop = logs_stop.clone();
            async move { pods.follow_logs(&log_pod, stop).await }
        });

        let mut server = RelayServer::new(listener, factory.clone());
        let exit = server.run_until_stopped(cancel).await;
        self.session.transition(SessionState::Draining);
        self.session.clear_local_addr();
        pump::log_exit(&exit, server.accepted());

        let forced_closed = server.drain(self.options.grace_period).await;
        factory.close();
        logs_stop.cancel();
        if let Err(e) = log_task.await {
            debug!(error = %e, "Log follower ended abnormally");
        }

        let accepted = server.accepted();
        match exit {
            ServeExit::Shutdown => Ok(Served { accepted, forced_closed }),
            ServeExit::TunnelLost(reason) => Err(SocatError::Tunnel(reason)),
            ServeExit::ListenerFailed(e) => Err(SocatError::Io(e)),
        }
    }
}
