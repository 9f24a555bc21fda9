use std::sync::Arc;

use clap::Parser;
use tracing::{debug, info};

use crate::cli::{parse_relay_target, Args};
use crate::config::{Config, Settings};
use crate::errors::{Result, SocatError};
use crate::k8s::{ClusterClient, KubeRelayPods, KubeTunnelConnector};
use crate::logging;
use crate::relay::{RelayController, RelayTarget};
use crate::signals::ShutdownSignal;
use crate::status::ExitStatus;

/// Main entry point for the CLI.
///
/// Parses arguments, loads configuration and runs one relay session until it
/// ends or `signal` fires. Everything that can be rejected locally is
/// rejected before the cluster is contacted.
pub fn run(args: Vec<String>, signal: ShutdownSignal) -> ExitStatus {
    let parsed = match Args::try_parse_from(&args) {
        Ok(args) => args,
        Err(e) => {
            e.print().ok();
            return if e.kind() == clap::error::ErrorKind::DisplayHelp
                || e.kind() == clap::error::ErrorKind::DisplayVersion {
                ExitStatus::Success
            } else {
                ExitStatus::Error
            };
        }
    };
    let traceback = parsed.verbose > 0;

    logging::init(parsed.verbose, parsed.log_format);

    let (target, settings) = match prepare(&parsed) {
        Ok(prepared) => prepared,
        Err(e) => return handle_error(e, traceback),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => return handle_error(SocatError::Io(e), traceback),
    };

    match runtime.block_on(program(target, settings, signal)) {
        Ok(status) => status,
        Err(e) => handle_error(e, traceback),
    }
}

/// Local validation: target, config file and settings
fn prepare(args: &Args) -> Result<(RelayTarget, Settings)> {
    let spec = args.target_spec().ok_or_else(|| {
        SocatError::Argument("missing LOCAL_PORT:REMOTE_HOST:REMOTE_PORT (see --help)".to_string())
    })?;
    let target = parse_relay_target(&spec)?;
    let config = Config::load(args.config.as_deref())?;
    let settings = Settings::resolve(args, &config)?;
    Ok((target, settings))
}

async fn program(target: RelayTarget, settings: Settings, signal: ShutdownSignal) -> Result<ExitStatus> {
    let client = ClusterClient::connect(settings.kubeconfig.as_deref(), settings.context.as_deref()).await?;
    let namespace = settings
        .namespace
        .clone()
        .unwrap_or_else(|| client.default_namespace().to_string());
    let spec = settings.relay_spec(target, &namespace)?;
    debug!(?spec, "Resolved relay session");

    let controller = RelayController::new(
        Arc::new(KubeRelayPods::new(client.clone(), settings.pods.clone())),
        Arc::new(KubeTunnelConnector::new(client, settings.tunnel.clone())),
        settings.session.clone(),
    );

    let report = controller.run(&spec, signal.token()).await?;
    info!(
        accepted = report.accepted,
        forced_closed = report.forced_closed,
        interrupted = signal.was_interrupted(),
        "Relay session ended"
    );
    Ok(ExitStatus::Success)
}

fn handle_error(error: SocatError, traceback: bool) -> ExitStatus {
    if traceback {
        eprintln!("Error: {:?}", error);
    } else {
        eprintln!("Error: {}", error);
    }

    ExitStatus::Error
}
