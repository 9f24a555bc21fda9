//! Exit status codes for the CLI
//!
//! kubectl-socat follows standard Unix exit code conventions:
//! - 0: Success, including a clean shutdown after Ctrl+C or SIGTERM
//! - 1: Any error (invalid arguments, pod or tunnel failures)
//! - 130: Forced exit on a second interrupt, before cleanup finished

use std::process::{ExitCode, Termination};

/// Exit status codes following standard Unix conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    /// Session ended cleanly
    Success = 0,
    /// Any fatal error
    Error = 1,
    /// User interrupted twice - standard SIGINT code
    Interrupted = 130,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status as u8)
    }
}

impl Termination for ExitStatus {
    fn report(self) -> ExitCode {
        ExitCode::from(self as u8)
    }
}
