//! Immutable description of one relay session

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use rand::Rng;

/// Image used for the relay container unless overridden
pub const DEFAULT_IMAGE: &str = "alpine/socat:latest";

/// Port socat listens on inside the relay pod
pub const DEFAULT_RELAY_PORT: u16 = 10000;

/// Prefix of generated relay pod names
pub const POD_NAME_PREFIX: &str = "socat-";

const SESSION_ID_LEN: usize = 10;
const SESSION_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Where to relay: the local port and the host:port reachable from the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTarget {
    /// Local port to listen on (0 lets the OS choose)
    pub local_port: u16,
    /// Remote host as seen from inside the cluster, without IPv6 brackets
    pub remote_host: String,
    /// Remote port
    pub remote_port: u16,
}

impl RelayTarget {
    /// `host:port`, bracketing IPv6 literals
    pub fn remote_addr(&self) -> String {
        if self.remote_host.contains(':') {
            format!("[{}]:{}", self.remote_host, self.remote_port)
        } else {
            format!("{}:{}", self.remote_host, self.remote_port)
        }
    }
}

impl fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local_port, self.remote_addr())
    }
}

/// Compute resources of the relay container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    pub cpu_request: Option<String>,
    pub memory_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
}

/// Template for the relay pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodTemplate {
    pub image: String,
    pub relay_port: u16,
    pub resources: Resources,
    /// Extra labels on top of the identification labels
    pub labels: BTreeMap<String, String>,
}

impl Default for PodTemplate {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            relay_port: DEFAULT_RELAY_PORT,
            resources: Resources {
                cpu_request: Some("10m".to_string()),
                memory_request: Some("10Mi".to_string()),
                cpu_limit: None,
                memory_limit: None,
            },
            labels: BTreeMap::new(),
        }
    }
}

/// Everything a session needs, fixed before it starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySpec {
    pub namespace: String,
    pub pod_name: String,
    /// Unique per invocation, used in the session label
    pub session_id: String,
    pub pod: PodTemplate,
    pub target: RelayTarget,
    pub bind_address: IpAddr,
}

impl RelaySpec {
    /// Build a spec with a generated pod name unless one is given
    pub fn new(
        namespace: impl Into<String>,
        pod_name: Option<String>,
        pod: PodTemplate,
        target: RelayTarget,
        bind_address: IpAddr,
    ) -> Self {
        let session_id = generate_session_id();
        let pod_name = pod_name.unwrap_or_else(|| format!("{}{}", POD_NAME_PREFIX, session_id));
        Self {
            namespace: namespace.into(),
            pod_name,
            session_id,
            pod,
            target,
            bind_address,
        }
    }

    /// Local socket address to bind
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.target.local_port)
    }
}

/// Random lowercase alphanumeric identifier for one session
pub fn generate_session_id() -> String {
    let mut rng = rand::rng();
    (0..SESSION_ID_LEN)
        .map(|_| SESSION_ID_ALPHABET[rng.random_range(0..SESSION_ID_ALPHABET.len())] as char)
        .collect()
}
