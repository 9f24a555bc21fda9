//! Local listener and stream pump
//!
//! Accepts local TCP connections, pairs each with a fresh tunnel stream and
//! copies bytes both ways until either side closes. Per-connection failures
//! stay here and are only logged at debug level.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::errors::SocatError;
use crate::relay::stream::StreamFactory;

const BUFFER_SIZE: usize = 16 * 1024;

type Incoming = Pin<Box<dyn Stream<Item = io::Result<(TcpStream, SocketAddr)>> + Send>>;

/// Why the accept loop stopped
#[derive(Debug)]
pub enum ServeExit {
    /// Session cancellation was requested
    Shutdown,
    /// The tunnel as a whole went away
    TunnelLost(String),
    /// The local listener failed
    ListenerFailed(io::Error),
}

/// Which side ended a connection pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBy {
    Local,
    Remote,
    Shutdown,
}

/// Bytes moved by one connection pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    /// local -> remote
    pub sent: u64,
    /// remote -> local
    pub received: u64,
    pub closed_by: ClosedBy,
}

/// Accepted local connections until `stop` fires or the listener fails.
///
/// The listener is owned by the stream and closed when the stream is dropped.
pub fn incoming(listener: TcpListener, stop: CancellationToken) -> impl Stream<Item = io::Result<(TcpStream, SocketAddr)>> {
    async_stream::stream! {
        loop {
            let accepted = tokio::select! {
                _ = stop.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok(conn) => yield Ok(conn),
                Err(e) if is_transient_accept_error(&e) => {
                    debug!(error = %e, "Transient accept error");
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    }
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Serves local connections over a tunnel
pub struct RelayServer {
    incoming: Option<Incoming>,
    accept_stop: CancellationToken,
    factory: Arc<dyn StreamFactory>,
    pairs: JoinSet<()>,
    pairs_stop: CancellationToken,
    accepted: u64,
}

impl RelayServer {
    pub fn new(listener: TcpListener, factory: Arc<dyn StreamFactory>) -> Self {
        let accept_stop = CancellationToken::new();
        Self {
            incoming: Some(Box::pin(incoming(listener, accept_stop.clone()))),
            accept_stop,
            factory,
            pairs: JoinSet::new(),
            pairs_stop: CancellationToken::new(),
            accepted: 0,
        }
    }

    /// Connections accepted so far
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Accept and relay connections until cancellation, tunnel loss or a
    /// listener failure.
    pub async fn run_until_stopped(&mut self, cancel: &CancellationToken) -> ServeExit {
        let health = self.factory.health().clone();
        let Some(mut incoming) = self.incoming.take() else {
            return ServeExit::Shutdown;
        };

        let exit = loop {
            tokio::select! {
                _ = cancel.cancelled() => break ServeExit::Shutdown,
                reason = health.lost() => break ServeExit::TunnelLost(reason),
                Some(joined) = self.pairs.join_next(), if !self.pairs.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            warn!(error = %e, "Connection task panicked");
                        }
                    }
                }
                next = incoming.next() => match next {
                    Some(Ok((stream, peer))) => {
                        self.accepted += 1;
                        let id = self.accepted;
                        trace!(conn = id, %peer, "Accepted connection");
                        self.pairs.spawn(handle_connection(
                            id,
                            stream,
                            peer,
                            Arc::clone(&self.factory),
                            self.pairs_stop.clone(),
                        ));
                    }
                    Some(Err(e)) => break ServeExit::ListenerFailed(e),
                    None => break ServeExit::Shutdown,
                },
            }
        };

        // Dropping the stream closes the listener
        self.accept_stop.cancel();
        drop(incoming);
        exit
    }

    /// Close every in-flight pair, waiting up to `grace` before forcing them.
    ///
    /// Returns how many pairs had to be forced.
    pub async fn drain(&mut self, grace: Duration) -> usize {
        self.accept_stop.cancel();
        self.incoming = None;
        self.pairs_stop.cancel();

        if self.pairs.is_empty() {
            return 0;
        }

        debug!(active = self.pairs.len(), grace_ms = grace.as_millis() as u64, "Draining connections");
        let pairs = &mut self.pairs;
        let finished = tokio::time::timeout(grace, async {
            while pairs.join_next().await.is_some() {}
        })
        .await;

        if finished.is_ok() {
            return 0;
        }

        let forced = self.pairs.len();
        warn!(forced, "Force-closing connections after grace period");
        self.pairs.abort_all();
        while self.pairs.join_next().await.is_some() {}
        forced
    }
}

async fn handle_connection(
    id: u64,
    local: TcpStream,
    peer: SocketAddr,
    factory: Arc<dyn StreamFactory>,
    stop: CancellationToken,
) {
    let _ = local.set_nodelay(true);

    let opened = tokio::select! {
        _ = stop.cancelled() => return,
        opened = factory.open() => opened,
    };
    let remote = match opened {
        Ok(remote) => remote,
        Err(e) => {
            debug!(conn = id, %peer, error = %e, "Could not open tunnel stream, closing connection");
            return;
        }
    };

    debug!(conn = id, %peer, "Relaying connection");
    match pump(local, remote, stop).await {
        Ok(stats) => debug!(
            conn = id,
            %peer,
            sent = stats.sent,
            received = stats.received,
            closed_by = ?stats.closed_by,
            "Connection closed"
        ),
        Err(e) => debug!(conn = id, %peer, error = %e, "Connection closed with error"),
    }
}

/// Copy bytes between `local` and `remote` until either direction reaches
/// EOF or fails, or `stop` fires. Both sides are shut down before returning.
pub async fn pump<L, R>(local: L, remote: R, stop: CancellationToken) -> Result<PumpStats, SocatError>
where
    L: AsyncRead + AsyncWrite + Send,
    R: AsyncRead + AsyncWrite + Send,
{
    let (mut local_rd, mut local_wr) = tokio::io::split(local);
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);
    let mut sent = 0u64;
    let mut received = 0u64;

    let result = tokio::select! {
        r = copy_half(&mut local_rd, &mut remote_wr, &mut sent) => r.map(|_| ClosedBy::Local),
        r = copy_half(&mut remote_rd, &mut local_wr, &mut received) => r.map(|_| ClosedBy::Remote),
        _ = stop.cancelled() => Ok(ClosedBy::Shutdown),
    };

    let _ = remote_wr.shutdown().await;
    let _ = local_wr.shutdown().await;

    let closed_by = result.map_err(SocatError::Pump)?;
    Ok(PumpStats { sent, received, closed_by })
}

async fn copy_half<R, W>(reader: &mut R, writer: &mut W, total: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *total += n as u64;
    }
}

/// Log a one-line summary of the serving phase
pub fn log_exit(exit: &ServeExit, accepted: u64) {
    match exit {
        ServeExit::Shutdown => info!(accepted, "Stopped accepting connections"),
        ServeExit::TunnelLost(reason) => warn!(accepted, %reason, "Tunnel lost"),
        ServeExit::ListenerFailed(e) => warn!(accepted, error = %e, "Local listener failed"),
    }
}
