//! Kubernetes client construction
//!
//! In-cluster the webhook authenticates with its service account. For local
//! development it can read a kubeconfig file instead.

use std::path::PathBuf;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::info;

use crate::Error;

/// Default connect timeout for API server requests
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read timeout for API server requests
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the client configuration comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KubeConfigSource {
    /// Service account token and CA mounted into the pod
    InCluster,
    /// Kubeconfig file on disk
    Kubeconfig(PathBuf),
}

/// Create a kube client from the given source with default timeouts
pub async fn create_client(source: &KubeConfigSource) -> Result<Client, Error> {
    create_client_with_timeout(source, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from the given source with custom timeouts
pub async fn create_client_with_timeout(
    source: &KubeConfigSource,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match source {
        KubeConfigSource::InCluster => Config::incluster()
            .map_err(|e| Error::config(format!("failed to load in-cluster config: {e}")))?,
        KubeConfigSource::Kubeconfig(path) => {
            info!(kubeconfig = %path.display(), "Using kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| Error::config(format!("failed to read kubeconfig: {e}")))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {e}")))?
        }
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);

    Ok(Client::try_from(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_kubeconfig_is_a_config_error() {
        let source = KubeConfigSource::Kubeconfig(PathBuf::from("/nonexistent/kubeconfig"));

        let err = create_client(&source)
            .await
            .err()
            .expect("missing kubeconfig must fail");
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("failed to read kubeconfig"));
    }
}
