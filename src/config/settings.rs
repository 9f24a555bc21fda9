//! Effective settings: command line over config file over defaults

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use super::Config;
use crate::cli::{validate_k8s_name, Args};
use crate::errors::{Result, SocatError};
use crate::k8s::{PodOptions, TunnelOptions};
use crate::relay::{PodTemplate, RelaySpec, RelayTarget, SessionOptions};
use crate::retry::RetryConfig;

/// Everything needed to run a session, resolved before touching the cluster
#[derive(Debug, Clone)]
pub struct Settings {
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    /// Namespace override; the kubeconfig context decides when unset
    pub namespace: Option<String>,
    pub pod_name: Option<String>,
    pub pod: PodTemplate,
    pub bind_address: IpAddr,
    pub session: SessionOptions,
    pub pods: PodOptions,
    pub tunnel: TunnelOptions,
}

fn parse_duration(value: Option<&String>, key: &str) -> Result<Option<Duration>> {
    value
        .map(|v| {
            humantime::parse_duration(v)
                .map_err(|e| SocatError::Config(format!("invalid timeouts.{} {:?}: {}", key, v, e)))
        })
        .transpose()
}

impl Settings {
    pub fn resolve(args: &Args, config: &Config) -> Result<Self> {
        let mut pod = PodTemplate::default();
        if let Some(image) = args.image.as_ref().or(config.image.as_ref()) {
            pod.image = image.clone();
        }
        if let Some(port) = args.relay_port.or(config.relay_port) {
            if port == 0 {
                return Err(SocatError::Argument("relay port must be between 1 and 65535".to_string()));
            }
            pod.relay_port = port;
        }

        let resources = &mut pod.resources;
        let file = &config.resources;
        for (slot, cli, from_file) in [
            (&mut resources.cpu_request, &args.cpu_request, &file.cpu_request),
            (&mut resources.memory_request, &args.memory_request, &file.memory_request),
            (&mut resources.cpu_limit, &args.cpu_limit, &file.cpu_limit),
            (&mut resources.memory_limit, &args.memory_limit, &file.memory_limit),
        ] {
            if let Some(value) = cli.as_ref().or(from_file.as_ref()) {
                *slot = Some(value.clone());
            }
        }
        pod.labels = config.labels.clone();

        let mut session = SessionOptions::default();
        if let Some(ready) = args.ready_timeout.or(parse_duration(config.timeouts.ready.as_ref(), "ready")?) {
            session.ready_timeout = ready;
        }
        if let Some(grace) = args.grace_period.or(parse_duration(config.timeouts.grace.as_ref(), "grace")?) {
            session.grace_period = grace;
        }

        let mut pods = PodOptions::default();
        if let Some(delete) = args.delete_timeout.or(parse_duration(config.timeouts.delete.as_ref(), "delete")?) {
            pods.delete_timeout = delete;
        }
        if let Some(attempts) = config.delete.attempts {
            pods.delete_retry = RetryConfig::with_max_attempts(attempts.max(1));
        }

        let mut tunnel = TunnelOptions::default();
        if let Some(interval) = parse_duration(config.timeouts.tunnel_check.as_ref(), "tunnel_check")? {
            if interval.is_zero() {
                return Err(SocatError::Config("timeouts.tunnel_check must be greater than zero".to_string()));
            }
            tunnel.check_interval = interval;
        }

        let namespace = args.namespace.clone().or_else(|| config.namespace.clone());
        if let Some(namespace) = &namespace {
            validate_k8s_name(namespace, "namespace")?;
        }
        if let Some(name) = &args.pod_name {
            validate_k8s_name(name, "pod")?;
        }

        Ok(Self {
            kubeconfig: args.kubeconfig.clone(),
            context: args.context.clone(),
            namespace,
            pod_name: args.pod_name.clone(),
            pod,
            bind_address: args
                .address
                .or(config.address)
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            session,
            pods,
            tunnel,
        })
    }

    /// Session spec for `target` in `namespace`
    pub fn relay_spec(&self, target: RelayTarget, namespace: &str) -> Result<RelaySpec> {
        validate_k8s_name(namespace, "namespace")?;
        if let Some(name) = &self.pod_name {
            validate_k8s_name(name, "pod")?;
        }
        Ok(RelaySpec::new(
            namespace,
            self.pod_name.clone(),
            self.pod.clone(),
            target,
            self.bind_address,
        ))
    }
}
