//! Error types for kubectl-socat

use std::time::Duration;
use thiserror::Error;

/// Main error type for kubectl-socat
///
/// Every variant except [`SocatError::StreamOpen`] and [`SocatError::Pump`]
/// ends the session. Those two are scoped to a single relayed connection and
/// never leave the stream pump.
#[derive(Error, Debug)]
pub enum SocatError {
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Cluster configuration error: {0}")]
    ClusterAuth(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Could not create relay pod {pod}: {reason}")]
    PodCreate {
        pod: String,
        reason: String,
    },

    #[error("Relay pod {pod} was not running after {}: {status}", fmt_duration(.timeout))]
    PodTimeout {
        pod: String,
        timeout: Duration,
        status: String,
    },

    #[error("Relay pod {pod} failed: {status}")]
    PodFailed {
        pod: String,
        status: String,
    },

    #[error("Tunnel error: {0}")]
    Tunnel(String),

    #[error("Could not open stream: {0}")]
    StreamOpen(String),

    #[error("Pump error: {0}")]
    Pump(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SocatError {
    /// Whether this error ends the whole relay session.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, SocatError::StreamOpen(_) | SocatError::Pump(_))
    }
}

fn fmt_duration(d: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*d)
}

pub type Result<T> = std::result::Result<T, SocatError>;
