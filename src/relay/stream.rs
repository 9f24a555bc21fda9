//! Seams between the lifecycle controller and the cluster
//!
//! The controller only sees these traits. The Kubernetes implementations
//! live in [`crate::k8s`]; tests plug in in-process fakes.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::relay::RelaySpec;

/// A bidirectional byte stream to the relay pod
pub trait RelayIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RelayIo for T {}

/// One logical forwarded connection. Dropping it closes the stream.
pub type RelayStream = Box<dyn RelayIo>;

/// Reference to a created relay pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodHandle {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for PodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Creates, awaits and deletes relay pods
#[async_trait]
pub trait RelayPods: Send + Sync {
    /// Submit the relay pod described by `spec`.
    async fn create(&self, spec: &RelaySpec) -> Result<PodHandle>;

    /// Wait until the pod is running.
    ///
    /// Fails with `PodTimeout` after `timeout`, or `PodFailed` as soon as the
    /// pod can no longer become ready.
    async fn wait_ready(&self, pod: &PodHandle, timeout: Duration) -> Result<()>;

    /// Best-effort delete. Never fails and returns within a bounded time.
    async fn delete(&self, pod: &PodHandle);

    /// Forward the relay process output to the log until `stop` fires.
    async fn follow_logs(&self, _pod: &PodHandle, _stop: CancellationToken) {}
}

/// Establishes the tunnel to a running relay pod
#[async_trait]
pub trait TunnelConnector: Send + Sync {
    async fn open_tunnel(&self, pod: &PodHandle, remote_port: u16) -> Result<Arc<dyn StreamFactory>>;
}

/// Opens streams over an established tunnel.
///
/// `open` may be called concurrently; implementations synchronize internally.
#[async_trait]
pub trait StreamFactory: Send + Sync {
    /// Open a new stream. Failure only affects the caller's connection.
    async fn open(&self) -> Result<RelayStream>;

    /// Tunnel-level health shared by every stream of this factory
    fn health(&self) -> &TunnelHealth;

    /// Stop background work. Called once when the session ends.
    fn close(&self) {}
}

/// Tunnel-level liveness, cancelled once the whole tunnel is gone
#[derive(Debug, Clone, Default)]
pub struct TunnelHealth {
    lost: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl TunnelHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the tunnel as lost. The first reason wins.
    pub fn mark_lost(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.lost.cancel();
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.get().cloned()
    }

    /// Resolves with the reason once the tunnel is lost
    pub async fn lost(&self) -> String {
        self.lost.cancelled().await;
        self.reason().unwrap_or_else(|| "tunnel closed".to_string())
    }
}
