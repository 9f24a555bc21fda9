//! Relay pod management
//!
//! Builds the socat pod manifest, waits for it to run and deletes it on
//! teardown.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, ContainerPort, Pod, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, PostParams};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{describe_error, is_not_found, is_retryable, ClusterClient};
use super::logs;
use crate::errors::{Result, SocatError};
use crate::relay::{PodHandle, RelayPods, RelaySpec, RelayTarget, Resources};
use crate::retry::{retry_with_backoff, RetryConfig};

/// Name of the relay container
pub const CONTAINER_NAME: &str = "socat";

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_SESSION: &str = "kubectl-socat/session";
const APP_NAME: &str = "kubectl-socat";

// Do not block scale-in of the cluster autoscaler
const ANNOTATION_SAFE_TO_EVICT: &str = "cluster-autoscaler.kubernetes.io/safe-to-evict";

/// Container waiting reasons that will not resolve on their own
const FATAL_WAITING_REASONS: &[&str] = &[
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
    "CreateContainerConfigError",
    "CreateContainerError",
    "CrashLoopBackOff",
];

const MAX_EVENTS: usize = 5;

/// Bound on the events lookup that decorates failure messages
const EVENTS_TIMEOUT: Duration = Duration::from_secs(2);

/// socat arguments: listen on the relay port, connect to the target per connection
pub fn socat_args(relay_port: u16, target: &RelayTarget) -> Vec<String> {
    vec![
        "-dd".to_string(),
        format!("tcp-listen:{},fork,reuseaddr", relay_port),
        format!("tcp-connect:{}", target.remote_addr()),
    ]
}

fn resource_list(cpu: &Option<String>, memory: &Option<String>) -> Option<BTreeMap<String, Quantity>> {
    let mut list = BTreeMap::new();
    if let Some(cpu) = cpu {
        list.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = memory {
        list.insert("memory".to_string(), Quantity(memory.clone()));
    }
    if list.is_empty() { None } else { Some(list) }
}

fn resource_requirements(resources: &Resources) -> ResourceRequirements {
    ResourceRequirements {
        requests: resource_list(&resources.cpu_request, &resources.memory_request),
        limits: resource_list(&resources.cpu_limit, &resources.memory_limit),
        ..Default::default()
    }
}

/// Pod manifest for a relay session
pub fn relay_pod_manifest(spec: &RelaySpec) -> Pod {
    let mut labels = spec.pod.labels.clone();
    labels.insert(LABEL_NAME.to_string(), APP_NAME.to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), APP_NAME.to_string());
    labels.insert(LABEL_SESSION.to_string(), spec.session_id.clone());

    let annotations = BTreeMap::from([(ANNOTATION_SAFE_TO_EVICT.to_string(), "true".to_string())]);

    Pod {
        metadata: ObjectMeta {
            name: Some(spec.pod_name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: CONTAINER_NAME.to_string(),
                image: Some(spec.pod.image.clone()),
                args: Some(socat_args(spec.pod.relay_port, &spec.target)),
                ports: Some(vec![ContainerPort {
                    container_port: i32::from(spec.pod.relay_port),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                resources: Some(resource_requirements(&spec.pod.resources)),
                ..Default::default()
            }],
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Readiness of a relay pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Running,
    /// Not running yet, with a description of why
    Pending(String),
    /// Will never run
    Failed(String),
}

/// Classify a pod for readiness purposes
pub fn check_readiness(pod: &Pod) -> Readiness {
    let Some(status) = pod.status.as_ref() else {
        return Readiness::Pending("no status yet".to_string());
    };
    let phase = status.phase.as_deref().unwrap_or("Unknown");

    match phase {
        "Running" => return Readiness::Running,
        "Failed" | "Succeeded" => return Readiness::Failed(describe_pod(pod)),
        _ => {}
    }

    let fatal_wait = status
        .container_statuses
        .iter()
        .flatten()
        .filter_map(|cs| cs.state.as_ref()?.waiting.as_ref())
        .any(|w| w.reason.as_deref().map(|r| FATAL_WAITING_REASONS.contains(&r)).unwrap_or(false));

    if fatal_wait {
        Readiness::Failed(describe_pod(pod))
    } else {
        Readiness::Pending(describe_pod(pod))
    }
}

/// One-line description of the pod phase and container states
pub fn describe_pod(pod: &Pod) -> String {
    let Some(status) = pod.status.as_ref() else {
        return "no status yet".to_string();
    };
    let mut parts = vec![format!("phase {}", status.phase.as_deref().unwrap_or("Unknown"))];
    if let Some(reason) = &status.reason {
        parts.push(reason.clone());
    }
    if let Some(message) = &status.message {
        parts.push(message.clone());
    }
    for cs in status.container_statuses.iter().flatten() {
        let Some(state) = cs.state.as_ref() else { continue };
        if let Some(waiting) = &state.waiting {
            let mut s = format!("container {} waiting", cs.name);
            if let Some(reason) = &waiting.reason {
                s.push_str(&format!(": {}", reason));
            }
            if let Some(message) = &waiting.message {
                s.push_str(&format!(" ({})", message));
            }
            parts.push(s);
        } else if let Some(terminated) = &state.terminated {
            parts.push(format!(
                "container {} terminated with exit code {}{}",
                cs.name,
                terminated.exit_code,
                terminated.reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default()
            ));
        }
    }
    if let Some(unscheduled) = status
        .conditions
        .iter()
        .flatten()
        .find(|c| c.type_ == "PodScheduled" && c.status == "False")
    {
        if let Some(message) = &unscheduled.message {
            parts.push(format!("unschedulable: {}", message));
        }
    }
    parts.join("; ")
}

/// Timing of pod operations
#[derive(Debug, Clone)]
pub struct PodOptions {
    /// First interval between readiness polls; doubles up to `max_poll_interval`
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub delete_retry: RetryConfig,
    /// Upper bound on the whole delete, retries included
    pub delete_timeout: Duration,
}

impl Default for PodOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            max_poll_interval: Duration::from_secs(2),
            delete_retry: RetryConfig::default(),
            delete_timeout: Duration::from_secs(15),
        }
    }
}

/// Relay pods backed by the Kubernetes API
pub struct KubeRelayPods {
    client: ClusterClient,
    options: PodOptions,
}

impl KubeRelayPods {
    pub fn new(client: ClusterClient, options: PodOptions) -> Self {
        Self { client, options }
    }

    /// Recent events of the pod, newest last, as one string
    async fn recent_events(&self, pod: &PodHandle) -> Option<String> {
        let params = ListParams::default().fields(&format!("involvedObject.name={}", pod.name));
        let listed = tokio::time::timeout(EVENTS_TIMEOUT, self.client.events(&pod.namespace).list(&params)).await;
        let events = match listed {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                debug!(pod = %pod, error = %e, "Could not list pod events");
                return None;
            }
            Err(_) => {
                debug!(pod = %pod, "Timed out listing pod events");
                return None;
            }
        };
        let lines: Vec<String> = events
            .items
            .iter()
            .map(|ev| {
                format!(
                    "{} {}: {}",
                    ev.type_.as_deref().unwrap_or("Normal"),
                    ev.reason.as_deref().unwrap_or("Unknown"),
                    ev.message.as_deref().unwrap_or("")
                )
            })
            .collect();
        if lines.is_empty() {
            return None;
        }
        let start = lines.len().saturating_sub(MAX_EVENTS);
        Some(lines[start..].join("; "))
    }

    async fn with_events(&self, pod: &PodHandle, status: String) -> String {
        match self.recent_events(pod).await {
            Some(events) => format!("{}; events: {}", status, events),
            None => status,
        }
    }

    /// Poll until the pod runs or fails. `last_status` keeps the latest
    /// pending status for the timeout message.
    async fn poll_until_running(&self, pod: &PodHandle, last_status: &mut String) -> Result<()> {
        let api = self.client.pods(&pod.namespace);
        let mut delay = self.options.poll_interval;

        loop {
            match api.get(&pod.name).await {
                Ok(current) => match check_readiness(&current) {
                    Readiness::Running => return Ok(()),
                    Readiness::Failed(status) => {
                        return Err(SocatError::PodFailed {
                            pod: pod.to_string(),
                            status: self.with_events(pod, status).await,
                        });
                    }
                    Readiness::Pending(status) => {
                        if status != *last_status {
                            info!(pod = %pod, %status, "Waiting for relay pod");
                            *last_status = status;
                        }
                    }
                },
                Err(e) if is_not_found(&e) => {
                    return Err(SocatError::PodFailed {
                        pod: pod.to_string(),
                        status: "pod was deleted while starting".to_string(),
                    });
                }
                Err(e) => {
                    debug!(pod = %pod, error = %e, "Could not get relay pod");
                    *last_status = format!("could not get pod: {}", describe_error(&e));
                }
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.options.max_poll_interval);
        }
    }
}

#[async_trait]
impl RelayPods for KubeRelayPods {
    async fn create(&self, spec: &RelaySpec) -> Result<PodHandle> {
        let manifest = relay_pod_manifest(spec);
        let created = self
            .client
            .pods(&spec.namespace)
            .create(&PostParams::default(), &manifest)
            .await
            .map_err(|e| SocatError::PodCreate {
                pod: format!("{}/{}", spec.namespace, spec.pod_name),
                reason: describe_error(&e),
            })?;

        Ok(PodHandle {
            namespace: created.metadata.namespace.unwrap_or_else(|| spec.namespace.clone()),
            name: created.metadata.name.unwrap_or_else(|| spec.pod_name.clone()),
        })
    }

    async fn wait_ready(&self, pod: &PodHandle, timeout: Duration) -> Result<()> {
        let mut last_status = "no status yet".to_string();
        match tokio::time::timeout(timeout, self.poll_until_running(pod, &mut last_status)).await {
            Ok(result) => result,
            Err(_) => Err(SocatError::PodTimeout {
                pod: pod.to_string(),
                timeout,
                status: self.with_events(pod, last_status).await,
            }),
        }
    }

    async fn delete(&self, pod: &PodHandle) {
        let api = self.client.pods(&pod.namespace);
        let params = DeleteParams {
            grace_period_seconds: Some(0),
            ..DeleteParams::default()
        };

        let attempt = || {
            let api = api.clone();
            let params = params.clone();
            let name = pod.name.clone();
            async move {
                match api.delete(&name, &params).await {
                    Ok(_) => Ok(()),
                    Err(e) if is_not_found(&e) => Ok(()),
                    Err(e) => Err(e),
                }
            }
        };

        let deleted = tokio::time::timeout(
            self.options.delete_timeout,
            retry_with_backoff(&self.options.delete_retry, "delete_relay_pod", is_retryable, attempt),
        )
        .await;

        match deleted {
            Ok(Ok(())) => info!(pod = %pod, "Deleted relay pod"),
            Ok(Err(e)) => warn!(
                pod = %pod,
                error = %describe_error(&e),
                "Could not delete relay pod, delete it with: kubectl delete pod -n {} {}",
                pod.namespace,
                pod.name
            ),
            Err(_) => warn!(
                pod = %pod,
                timeout = %humantime::format_duration(self.options.delete_timeout),
                "Timed out deleting relay pod, delete it with: kubectl delete pod -n {} {}",
                pod.namespace,
                pod.name
            ),
        }
    }

    async fn follow_logs(&self, pod: &PodHandle, stop: CancellationToken) {
        logs::follow(self.client.pods(&pod.namespace), pod, CONTAINER_NAME, stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::PodTemplate;
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateWaiting, ContainerStatus, PodStatus};
    use std::net::Ipv4Addr;

    fn spec() -> RelaySpec {
        let target = RelayTarget { local_port: 8080, remote_host: "db.internal".into(), remote_port: 5432 };
        RelaySpec::new("tools", Some("socat-test".into()), PodTemplate::default(), target, Ipv4Addr::LOCALHOST.into())
    }

    fn pod_with(phase: &str, waiting_reason: Option<&str>) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: waiting_reason.map(|reason| {
                    vec![ContainerStatus {
                        name: CONTAINER_NAME.to_string(),
                        state: Some(ContainerState {
                            waiting: Some(ContainerStateWaiting {
                                reason: Some(reason.to_string()),
                                message: Some("back-off pulling image".to_string()),
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_socat_args() {
        let target = RelayTarget { local_port: 1, remote_host: "fd00::1".into(), remote_port: 22 };
        assert_eq!(
            socat_args(10000, &target),
            vec!["-dd", "tcp-listen:10000,fork,reuseaddr", "tcp-connect:[fd00::1]:22"]
        );
    }

    #[test]
    fn test_manifest() {
        let spec = spec();
        let pod = relay_pod_manifest(&spec);
        assert_eq!(pod.metadata.name.as_deref(), Some("socat-test"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("tools"));

        let labels = pod.metadata.labels.unwrap();
        assert_eq!(labels.get(LABEL_MANAGED_BY).map(String::as_str), Some("kubectl-socat"));
        assert_eq!(labels.get(LABEL_SESSION), Some(&spec.session_id));
        let annotations = pod.metadata.annotations.unwrap();
        assert_eq!(annotations.get(ANNOTATION_SAFE_TO_EVICT).map(String::as_str), Some("true"));

        let pod_spec = pod.spec.unwrap();
        assert_eq!(pod_spec.restart_policy.as_deref(), Some("Never"));
        let container = &pod_spec.containers[0];
        assert_eq!(container.image.as_deref(), Some("alpine/socat:latest"));
        assert_eq!(container.args.as_ref().unwrap()[2], "tcp-connect:db.internal:5432");
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 10000);

        let resources = container.resources.as_ref().unwrap();
        let requests = resources.requests.as_ref().unwrap();
        assert_eq!(requests.get("cpu"), Some(&Quantity("10m".into())));
        assert_eq!(requests.get("memory"), Some(&Quantity("10Mi".into())));
        assert!(resources.limits.is_none());
    }

    #[test]
    fn test_readiness() {
        assert_eq!(check_readiness(&pod_with("Running", None)), Readiness::Running);
        assert!(matches!(check_readiness(&pod_with("Pending", None)), Readiness::Pending(_)));
        assert!(matches!(check_readiness(&pod_with("Failed", None)), Readiness::Failed(_)));
        assert!(matches!(check_readiness(&pod_with("Succeeded", None)), Readiness::Failed(_)));
        assert!(matches!(check_readiness(&Pod::default()), Readiness::Pending(_)));
        assert!(matches!(check_readiness(&pod_with("Pending", Some("ContainerCreating"))), Readiness::Pending(_)));
    }

    #[test]
    fn test_image_pull_failure_fails_fast() {
        match check_readiness(&pod_with("Pending", Some("ImagePullBackOff"))) {
            Readiness::Failed(status) => {
                assert!(status.contains("ImagePullBackOff"), "{}", status);
                assert!(status.contains("back-off pulling image"), "{}", status);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
