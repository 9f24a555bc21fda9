use kubectl_socat::core;
use kubectl_socat::signals::ShutdownSignal;
use kubectl_socat::status::ExitStatus;

/// Entry point - turns Ctrl+C/SIGTERM into session cancellation and calls core::run()
///
/// Returns ExitStatus directly, which implements std::process::Termination.
fn main() -> ExitStatus {
    let signal = ShutdownSignal::new();
    if let Err(e) = signal.install() {
        eprintln!("Warning: could not install signal handler: {}", e);
    }

    let args: Vec<String> = std::env::args().collect();
    core::run(args, signal)
}
