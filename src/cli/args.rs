//! CLI argument definitions using clap
//!
//! This module defines all command-line arguments for kubectl-socat.

use clap::{ArgAction, Parser, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "kubectl-socat", bin_name = "kubectl socat", version, about, long_about = None)]
#[command(after_help = "Examples:\n  \
    kubectl socat 8080:db.internal.example.com:5432\n  \
    kubectl socat -n tools --context staging 2222:[fd00::10]:22\n  \
    kubectl socat -l 3306 -r mysql.internal:3306")]
pub struct Args {
    // =========================================================================
    // POSITIONAL ARGUMENTS
    // =========================================================================

    /// Local port, remote host and remote port to relay
    #[arg(value_name = "LOCAL_PORT:REMOTE_HOST:REMOTE_PORT")]
    pub target: Option<String>,

    /// Local port (use with --remote instead of the positional form)
    #[arg(short = 'l', long = "local-port", value_name = "PORT", conflicts_with = "target", requires = "remote")]
    pub local_port: Option<u16>,

    /// Remote host:port (use with --local-port instead of the positional form)
    #[arg(short = 'r', long = "remote", value_name = "HOST:PORT", conflicts_with = "target", requires = "local_port")]
    pub remote: Option<String>,

    // =========================================================================
    // CLUSTER
    // =========================================================================

    /// Namespace to create the relay pod in (default: from kubeconfig)
    #[arg(short = 'n', long = "namespace", value_name = "NAMESPACE")]
    pub namespace: Option<String>,

    /// Path to the kubeconfig file
    #[arg(long = "kubeconfig", value_name = "PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// Name of the kubeconfig context to use
    #[arg(long = "context", value_name = "NAME")]
    pub context: Option<String>,

    // =========================================================================
    // RELAY POD
    // =========================================================================

    /// Container image providing socat
    #[arg(long = "image", value_name = "IMAGE")]
    pub image: Option<String>,

    /// Name of the relay pod (default: socat-<random>)
    #[arg(long = "pod-name", value_name = "NAME")]
    pub pod_name: Option<String>,

    /// Port the relay listens on inside the pod
    #[arg(long = "relay-port", value_name = "PORT")]
    pub relay_port: Option<u16>,

    /// CPU request of the relay container
    #[arg(long = "cpu-request", value_name = "QUANTITY")]
    pub cpu_request: Option<String>,

    /// Memory request of the relay container
    #[arg(long = "memory-request", value_name = "QUANTITY")]
    pub memory_request: Option<String>,

    /// CPU limit of the relay container
    #[arg(long = "cpu-limit", value_name = "QUANTITY")]
    pub cpu_limit: Option<String>,

    /// Memory limit of the relay container
    #[arg(long = "memory-limit", value_name = "QUANTITY")]
    pub memory_limit: Option<String>,

    // =========================================================================
    // LOCAL LISTENER
    // =========================================================================

    /// Local address to bind
    #[arg(long = "address", value_name = "IP")]
    pub address: Option<IpAddr>,

    // =========================================================================
    // TIMEOUTS
    // =========================================================================

    /// How long to wait for the relay pod to become running (e.g. 60s, 2m)
    #[arg(long = "ready-timeout", value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub ready_timeout: Option<Duration>,

    /// How long in-flight connections may take to close on shutdown
    #[arg(long = "grace-period", value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub grace_period: Option<Duration>,

    /// Upper bound on relay pod deletion during teardown
    #[arg(long = "delete-timeout", value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub delete_timeout: Option<Duration>,

    // =========================================================================
    // TROUBLESHOOTING
    // =========================================================================

    /// Config file (default: <config dir>/kubectl-socat/config.toml)
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Output format for logs: json (JSON Lines) or text (default)
    #[arg(long = "log-format", value_name = "FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log format for structured output
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Plain text output (default)
    #[default]
    Text,
    /// JSON Lines format for parsing
    Json,
}

impl Args {
    /// The relay target in `LOCAL_PORT:REMOTE_HOST:REMOTE_PORT` form,
    /// whichever way it was given.
    pub fn target_spec(&self) -> Option<String> {
        match (&self.target, self.local_port, &self.remote) {
            (Some(target), _, _) => Some(target.clone()),
            (None, Some(local), Some(remote)) => Some(format!("{}:{}", local, remote)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_target() {
        let args = Args::try_parse_from(["kubectl-socat", "8080:db.internal:5432"]).unwrap();
        assert_eq!(args.target_spec().as_deref(), Some("8080:db.internal:5432"));
        assert_eq!(args.log_format, LogFormat::Text);
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn test_legacy_flags() {
        let args = Args::try_parse_from(["kubectl-socat", "-l", "3306", "-r", "mysql:3306"]).unwrap();
        assert_eq!(args.target_spec().as_deref(), Some("3306:mysql:3306"));
    }

    #[test]
    fn test_legacy_flags_conflict_with_positional() {
        let result = Args::try_parse_from(["kubectl-socat", "-l", "1", "-r", "a:2", "1:a:2"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_local_port_requires_remote() {
        assert!(Args::try_parse_from(["kubectl-socat", "-l", "3306"]).is_err());
    }

    #[test]
    fn test_cluster_and_timeout_flags() {
        let args = Args::try_parse_from([
            "kubectl-socat", "-n", "tools", "--context", "staging",
            "--ready-timeout", "2m", "--grace-period", "500ms", "-vv",
            "--log-format", "json", "1:a:2",
        ])
        .unwrap();
        assert_eq!(args.namespace.as_deref(), Some("tools"));
        assert_eq!(args.context.as_deref(), Some("staging"));
        assert_eq!(args.ready_timeout, Some(Duration::from_secs(120)));
        assert_eq!(args.grace_period, Some(Duration::from_millis(500)));
        assert_eq!(args.verbose, 2);
        assert_eq!(args.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_duration() {
        assert!(Args::try_parse_from(["kubectl-socat", "--ready-timeout", "soon", "1:a:2"]).is_err());
    }
}
