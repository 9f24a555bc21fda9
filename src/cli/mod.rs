//! CLI argument parsing and target validation

pub mod args;
pub mod target;

// Re-exports
pub use args::{Args, LogFormat};
pub use target::{parse_relay_target, validate_k8s_name};
