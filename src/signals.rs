//! Interrupt/signal handling for graceful shutdown
//!
//! OS signals are translated into a [`CancellationToken`] that is handed down
//! to every blocking operation, so shutdown can be driven in tests without
//! sending real signals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::status::ExitStatus;

/// Session-wide shutdown trigger
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
    interrupted: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the Ctrl+C / SIGTERM handler.
    ///
    /// The first signal cancels the token so the session drains and deletes
    /// its relay pod. A second signal exits immediately.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let signal = self.clone();
        ctrlc::set_handler(move || {
            if signal.interrupted.swap(true, Ordering::SeqCst) {
                eprintln!("\nInterrupted again, exiting without cleanup");
                std::process::exit(ExitStatus::Interrupted as i32);
            }
            eprintln!("\nInterrupted, shutting down");
            signal.token.cancel();
        })
    }

    /// Token cancelled on shutdown
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger shutdown without an OS signal
    pub fn trigger(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.token.cancel();
    }

    /// Check if shutdown was requested
    #[inline]
    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}
