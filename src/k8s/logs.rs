//! Relay pod log follower

use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::LogParams;
use kube::Api;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::client::describe_error;
use crate::relay::PodHandle;

/// Forward the output of `container` to the `socat` log target until `stop`
/// fires or the stream ends. Failures are logged and otherwise ignored.
pub async fn follow(api: Api<Pod>, pod: &PodHandle, container: &str, stop: CancellationToken) {
    let params = LogParams {
        follow: true,
        container: Some(container.to_string()),
        ..LogParams::default()
    };

    let reader = tokio::select! {
        _ = stop.cancelled() => return,
        reader = api.log_stream(&pod.name, &params) => reader,
    };
    let reader = match reader {
        Ok(reader) => reader,
        Err(e) => {
            debug!(pod = %pod, error = %describe_error(&e), "Could not follow relay pod logs");
            return;
        }
    };

    let mut lines = Box::pin(reader.lines());
    loop {
        let next = tokio::select! {
            _ = stop.cancelled() => break,
            next = lines.try_next() => next,
        };
        match next {
            Ok(Some(line)) => debug!(target: "socat", "{}", line),
            Ok(None) => {
                debug!(pod = %pod, "Relay pod log stream ended");
                break;
            }
            Err(e) => {
                debug!(pod = %pod, error = %e, "Relay pod log stream failed");
                break;
            }
        }
    }
}
