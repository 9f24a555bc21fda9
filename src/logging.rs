//! Structured logging setup
//!
//! Logs go to stderr so they never mix with anything a caller pipes through
//! stdout. `RUST_LOG` takes precedence over the `-v` flags.

use tracing_subscriber::EnvFilter;

use crate::cli::LogFormat;

/// Build the default filter directive for a verbosity level
pub fn default_directive(verbose: u8) -> String {
    let own = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let deps = if verbose >= 2 { "debug" } else { "warn" };
    format!("{deps},kubectl_socat={own},socat={own}")
}

/// Install the global tracing subscriber.
///
/// Calling this twice is harmless: the second install is ignored.
pub fn init(verbose: u8, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 0);

    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
