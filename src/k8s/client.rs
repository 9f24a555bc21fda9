//! Cluster client
//!
//! Built once per invocation from kubeconfig options and passed down to the
//! pod manager and tunnel connector.

use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Event, Pod};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tracing::debug;

use crate::errors::{Result, SocatError};

/// Connection timeout for API server requests
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
    default_namespace: String,
}

impl ClusterClient {
    /// Wrap an existing kube client
    pub fn new(client: Client, default_namespace: impl Into<String>) -> Self {
        Self {
            client,
            default_namespace: default_namespace.into(),
        }
    }

    /// Load cluster configuration the way kubectl does.
    ///
    /// With neither a kubeconfig path nor a context, the config is inferred
    /// (`KUBECONFIG`, `~/.kube/config`, then in-cluster).
    pub async fn connect(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Self> {
        let options = KubeConfigOptions {
            context: context.map(String::from),
            ..Default::default()
        };

        let mut config = match (kubeconfig, context) {
            (Some(path), _) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| SocatError::ClusterAuth(format!(
                    "failed to read kubeconfig {}: {}", path.display(), e
                )))?;
                Config::from_custom_kubeconfig(kubeconfig, &options).await.map_err(|e| SocatError::ClusterAuth(format!(
                    "failed to load kubeconfig {}: {}", path.display(), e
                )))?
            }
            (None, Some(context)) => Config::from_kubeconfig(&options).await.map_err(|e| SocatError::ClusterAuth(format!(
                "failed to load context {}: {}", context, e
            )))?,
            (None, None) => Config::infer().await.map_err(|e| SocatError::ClusterAuth(format!(
                "failed to infer cluster config: {}", e
            )))?,
        };
        config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);

        let default_namespace = config.default_namespace.clone();
        debug!(cluster = %config.cluster_url, namespace = %default_namespace, "Loaded cluster config");

        let client = Client::try_from(config)
            .map_err(|e| SocatError::ClusterAuth(format!("failed to create client: {}", e)))?;

        Ok(Self::new(client, default_namespace))
    }

    /// Namespace of the selected context
    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    pub fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn events(&self, namespace: &str) -> Api<Event> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Whether a kube error is an API 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// Whether retrying a failed call can help
pub fn is_retryable(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(resp) => resp.code == 409 || resp.code == 429 || resp.code >= 500,
        _ => true,
    }
}

/// Short human-readable description of a kube error
pub fn describe_error(err: &kube::Error) -> String {
    match err {
        kube::Error::Api(resp) => match resp.code {
            401 => format!("unauthorized: {}", resp.message),
            403 => format!("forbidden: {}", resp.message),
            _ => format!("{} ({})", resp.message, resp.code),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "pods \"socat-x\" something".into(),
            reason: "Test".into(),
            code,
        })
    }

    #[test]
    fn test_error_classification() {
        assert!(is_not_found(&api_error(404)));
        assert!(!is_not_found(&api_error(500)));
        assert!(is_retryable(&api_error(503)));
        assert!(is_retryable(&api_error(429)));
        assert!(!is_retryable(&api_error(403)));
        assert!(describe_error(&api_error(403)).starts_with("forbidden"));
    }
}
