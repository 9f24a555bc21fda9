//! kubectl-socat library interface
//!
//! Relays a local TCP port to a host:port reachable only from inside a
//! Kubernetes cluster, through a short-lived socat pod and the API server's
//! port-forward.
//!
//! # Module Organization
//!
//! - [`relay`] - Session lifecycle, stream pump and the cluster seams
//! - [`k8s`] - Kubernetes implementations of the seams
//! - [`cli`] - Arguments and target parsing
//! - [`config`] - Config file and effective settings
//! - [`signals`] - Shutdown signal (ShutdownSignal)
//! - [`errors`] - Error types (SocatError, Result)
//! - [`status`] - Exit status codes (ExitStatus)
//! - [`core`] - Main execution logic

pub mod cli;
pub mod config;
pub mod core;
pub mod errors;
pub mod k8s;
pub mod logging;
pub mod relay;
pub mod retry;
pub mod signals;
pub mod status;
