//! Common test utilities for kubectl-socat integration tests
//!
//! This module provides shared test infrastructure including:
//! - CLI invocation helpers
//! - In-process fakes of the relay pod manager and tunnel connector
//! - Local echo servers standing in for the remote target

#![allow(dead_code)]

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use kubectl_socat::errors::{Result, SocatError};
use kubectl_socat::relay::{
    PodHandle, PodTemplate, RelayPods, RelaySpec, RelayStream, RelayTarget, SessionSnapshot, SessionState,
    StreamFactory, TunnelConnector, TunnelHealth,
};

/// Upper bound for anything a test waits on
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// CLI
// ============================================================================

/// Result of running the CLI
#[derive(Debug)]
pub struct CliResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Run the binary with an isolated config dir and a kubeconfig that does not exist
pub fn socat(args: &[&str]) -> CliResponse {
    let home = TempDir::new().expect("temp dir");
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_kubectl-socat"));
    cmd.args(args)
        .env("XDG_CONFIG_HOME", home.path())
        .env("HOME", home.path())
        .env("KUBECONFIG", home.path().join("no-such-kubeconfig"))
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = cmd.output().expect("failed to run kubectl-socat");
    CliResponse {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// Spec relaying an OS-assigned local port to `db.internal:5432`
pub fn test_spec() -> RelaySpec {
    let target = RelayTarget {
        local_port: 0,
        remote_host: "db.internal".into(),
        remote_port: 5432,
    };
    RelaySpec::new("default", None, PodTemplate::default(), target, IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Wait until the session serves and return its bound address
pub async fn wait_serving(rx: &mut watch::Receiver<SessionSnapshot>) -> SocketAddr {
    let snapshot = tokio::time::timeout(
        TEST_TIMEOUT,
        rx.wait_for(|s| s.state == SessionState::Serving && s.local_addr.is_some()),
    )
    .await
    .expect("session never started serving")
    .expect("session dropped");
    snapshot.local_addr.expect("bound address")
}

// ============================================================================
// Fake relay pods
// ============================================================================

/// How the fake pod behaves while waiting for readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Never becomes ready and never returns
    Hang,
    /// Times out after the requested timeout
    Timeout,
    Failed,
}

pub struct FakePods {
    pub readiness: Readiness,
    pub fail_create: bool,
    pub create_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
}

impl FakePods {
    fn build(readiness: Readiness, fail_create: bool) -> Self {
        Self {
            readiness,
            fail_create,
            create_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn new(readiness: Readiness) -> Arc<Self> {
        Arc::new(Self::build(readiness, false))
    }

    pub fn failing_create() -> Arc<Self> {
        Arc::new(Self::build(Readiness::Ready, true))
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayPods for FakePods {
    async fn create(&self, spec: &RelaySpec) -> Result<PodHandle> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(SocatError::PodCreate {
                pod: spec.pod_name.clone(),
                reason: "forbidden: quota exceeded".into(),
            });
        }
        Ok(PodHandle {
            namespace: spec.namespace.clone(),
            name: spec.pod_name.clone(),
        })
    }

    async fn wait_ready(&self, pod: &PodHandle, timeout: Duration) -> Result<()> {
        match self.readiness {
            Readiness::Ready => Ok(()),
            Readiness::Hang => std::future::pending().await,
            Readiness::Timeout => {
                tokio::time::sleep(timeout).await;
                Err(SocatError::PodTimeout {
                    pod: pod.to_string(),
                    timeout,
                    status: "phase Pending".into(),
                })
            }
            Readiness::Failed => Err(SocatError::PodFailed {
                pod: pod.to_string(),
                status: "container socat waiting: ImagePullBackOff".into(),
            }),
        }
    }

    async fn delete(&self, pod: &PodHandle) {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.deleted.lock().unwrap().push(pod.name.clone());
    }
}

// ============================================================================
// Fake tunnel
// ============================================================================

/// Connects every stream straight to `target`
pub struct FakeConnector {
    pub target: SocketAddr,
    pub fail_tunnel: bool,
    pub fail_opens: bool,
    /// Wrap streams so their shutdown never completes
    pub stuck_shutdown: bool,
    pub health: TunnelHealth,
    pub opens: Arc<AtomicUsize>,
    pub closed: Arc<AtomicBool>,
}

impl FakeConnector {
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            fail_tunnel: false,
            fail_opens: false,
            stuck_shutdown: false,
            health: TunnelHealth::new(),
            opens: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl TunnelConnector for FakeConnector {
    async fn open_tunnel(&self, pod: &PodHandle, _remote_port: u16) -> Result<Arc<dyn StreamFactory>> {
        if self.fail_tunnel {
            return Err(SocatError::Tunnel(format!("port-forward to {} forbidden", pod)));
        }
        Ok(Arc::new(FakeFactory {
            target: self.target,
            fail_opens: self.fail_opens,
            stuck_shutdown: self.stuck_shutdown,
            health: self.health.clone(),
            opens: Arc::clone(&self.opens),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct FakeFactory {
    target: SocketAddr,
    fail_opens: bool,
    stuck_shutdown: bool,
    health: TunnelHealth,
    opens: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl StreamFactory for FakeFactory {
    async fn open(&self) -> Result<RelayStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_opens {
            return Err(SocatError::StreamOpen("connection refused".into()));
        }
        let stream = TcpStream::connect(self.target)
            .await
            .map_err(|e| SocatError::StreamOpen(e.to_string()))?;
        if self.stuck_shutdown {
            Ok(Box::new(StuckShutdown(stream)))
        } else {
            Ok(Box::new(stream))
        }
    }

    fn health(&self) -> &TunnelHealth {
        &self.health
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Stream whose shutdown never completes
pub struct StuckShutdown<T>(pub T);

impl<T: AsyncRead + Unpin> AsyncRead for StuckShutdown<T> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for StuckShutdown<T> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

// ============================================================================
// Remote targets
// ============================================================================

/// Echo server standing in for the remote host; runs until `stop` fires
pub async fn spawn_echo_server(stop: CancellationToken) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind echo server");
    let addr = listener.local_addr().expect("echo addr");
    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = stop.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let Ok((mut stream, _)) = accepted else { break };
            tokio::spawn(async move {
                let (mut rd, mut wr) = stream.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    addr
}
