//! Kubernetes integration
//!
//! Implements the relay seams against a real cluster: the relay pod through
//! the pods API and the tunnel through the API server's port-forward.

pub mod client;
pub mod logs;
pub mod pod;
pub mod tunnel;

pub use client::ClusterClient;
pub use pod::{relay_pod_manifest, KubeRelayPods, PodOptions};
pub use tunnel::{KubeTunnelConnector, TunnelOptions};
