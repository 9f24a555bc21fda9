//! Port-forward tunnel to the relay pod
//!
//! The API server's port-forward carries one logical stream per request, so
//! every local connection gets its own port-forward. A background monitor
//! watches the pod and marks the tunnel lost once it is gone.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{describe_error, is_not_found, ClusterClient};
use super::pod::{check_readiness, describe_pod, Readiness};
use crate::errors::{Result, SocatError};
use crate::relay::{PodHandle, RelayStream, StreamFactory, TunnelConnector, TunnelHealth};

/// Options of the tunnel health monitor
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    pub check_interval: Duration,
    /// Consecutive failed pod lookups before the tunnel counts as lost
    pub failure_threshold: u32,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            failure_threshold: 3,
        }
    }
}

/// Opens port-forward tunnels through the API server
pub struct KubeTunnelConnector {
    client: ClusterClient,
    options: TunnelOptions,
}

impl KubeTunnelConnector {
    pub fn new(client: ClusterClient, options: TunnelOptions) -> Self {
        Self { client, options }
    }
}

#[async_trait]
impl TunnelConnector for KubeTunnelConnector {
    async fn open_tunnel(&self, pod: &PodHandle, remote_port: u16) -> Result<Arc<dyn StreamFactory>> {
        let api = self.client.pods(&pod.namespace);

        // Fail before binding the local port if port-forward is not permitted
        let mut probe = api.portforward(&pod.name, &[remote_port]).await.map_err(|e| {
            SocatError::Tunnel(format!("could not port-forward to {}: {}", pod, describe_error(&e)))
        })?;
        if probe.take_stream(remote_port).is_none() {
            probe.abort();
            return Err(SocatError::Tunnel(format!("no stream for port {} on {}", remote_port, pod)));
        }
        probe.abort();
        debug!(pod = %pod, port = remote_port, "Port-forward available");

        let streams = Arc::new(PortForwardStreams {
            pods: api,
            pod: pod.clone(),
            port: remote_port,
            health: TunnelHealth::new(),
            closed: CancellationToken::new(),
            next_id: AtomicU64::new(0),
            active: Arc::new(AtomicUsize::new(0)),
        });
        tokio::spawn(monitor(
            streams.pods.clone(),
            pod.clone(),
            streams.health.clone(),
            streams.closed.clone(),
            self.options.clone(),
        ));

        Ok(streams)
    }
}

/// One port-forward per opened stream
pub struct PortForwardStreams {
    pods: Api<Pod>,
    pod: PodHandle,
    port: u16,
    health: TunnelHealth,
    closed: CancellationToken,
    next_id: AtomicU64,
    active: Arc<AtomicUsize>,
}

#[async_trait]
impl StreamFactory for PortForwardStreams {
    async fn open(&self) -> Result<RelayStream> {
        if let Some(reason) = self.health.reason() {
            return Err(SocatError::StreamOpen(reason));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut forwarder = match self.pods.portforward(&self.pod.name, &[self.port]).await {
            Ok(forwarder) => forwarder,
            Err(e) => {
                if is_not_found(&e) {
                    self.health.mark_lost(format!("relay pod {} was deleted", self.pod));
                }
                return Err(SocatError::StreamOpen(describe_error(&e)));
            }
        };
        let Some(stream) = forwarder.take_stream(self.port) else {
            forwarder.abort();
            return Err(SocatError::StreamOpen(format!("no stream for port {}", self.port)));
        };

        let active = Arc::clone(&self.active);
        active.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            if let Err(e) = forwarder.join().await {
                debug!(stream = id, error = %e, "Port-forward ended with error");
            }
            active.fetch_sub(1, Ordering::Relaxed);
        });

        debug!(stream = id, pod = %self.pod, "Opened tunnel stream");
        Ok(Box::new(stream))
    }

    fn health(&self) -> &TunnelHealth {
        &self.health
    }

    fn close(&self) {
        debug!(pod = %self.pod, active = self.active.load(Ordering::Relaxed), "Closing tunnel");
        self.closed.cancel();
    }
}

/// Poll the relay pod and mark the tunnel lost when it disappears, stops
/// running or the API server stays unreachable.
async fn monitor(pods: Api<Pod>, pod: PodHandle, health: TunnelHealth, closed: CancellationToken, options: TunnelOptions) {
    let mut failures = 0u32;
    loop {
        tokio::select! {
            _ = closed.cancelled() => return,
            _ = tokio::time::sleep(options.check_interval) => {}
        }

        match pods.get_opt(&pod.name).await {
            Ok(None) => {
                health.mark_lost(format!("relay pod {} was deleted", pod));
                return;
            }
            Ok(Some(current)) => {
                failures = 0;
                if let Readiness::Running = check_readiness(&current) {
                    continue;
                }
                let status = describe_pod(&current);
                info!(pod = %pod, %status, "Relay pod stopped running");
                health.mark_lost(format!("relay pod {} stopped running: {}", pod, status));
                return;
            }
            Err(e) => {
                failures += 1;
                warn!(pod = %pod, failures, error = %describe_error(&e), "Could not check relay pod");
                if failures >= options.failure_threshold {
                    health.mark_lost(format!("lost contact with the API server: {}", describe_error(&e)));
                    return;
                }
            }
        }
    }
}
