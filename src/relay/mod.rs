//! Relay core
//!
//! A session creates a short-lived socat pod, opens a port-forward tunnel to
//! it and relays local TCP connections through that tunnel:
//!
//! ```text
//! client -> 127.0.0.1:LOCAL_PORT -> API server tunnel -> relay pod -> REMOTE_HOST:REMOTE_PORT
//! ```

pub mod controller;
pub mod pump;
pub mod session;
pub mod spec;
pub mod stream;

pub use controller::{RelayController, SessionOptions};
pub use pump::{pump, PumpStats, RelayServer, ServeExit};
pub use session::{RelaySession, SessionReport, SessionSnapshot, SessionState};
pub use spec::{PodTemplate, RelaySpec, RelayTarget, Resources};
pub use stream::{PodHandle, RelayPods, RelayStream, StreamFactory, TunnelConnector, TunnelHealth};
