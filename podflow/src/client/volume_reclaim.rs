//! Shared volume deletion through the Kubernetes API.
//!
//! Runs inside the exit handler, so it authenticates with the pod's service
//! account.

use std::path::Path;
use std::time::Duration;

use reqwest::{Certificate, Client, StatusCode};
use tracing::{info, warn};

use crate::errors::{BackendError, PodflowError};

/// Service account mount inside every pod.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Deletes persistent volume claims.
#[derive(Debug, Clone)]
pub struct KubernetesVolumeReclaimer {
    client: Client,
    api_server: String,
    namespace: String,
    token: String,
}

impl KubernetesVolumeReclaimer {
    /// Creates a reclaimer with explicit settings.
    pub fn new(
        api_server: impl Into<String>,
        namespace: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, PodflowError> {
        Self::build(api_server.into(), namespace.into(), token.into(), None)
    }

    /// Uses the in-cluster service account and the `KUBERNETES_SERVICE_*`
    /// variables.
    pub fn in_cluster() -> Result<Self, PodflowError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            PodflowError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "KUBERNETES_SERVICE_HOST is not set; not running inside a cluster",
            ))
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        Self::from_service_account_dir(SERVICE_ACCOUNT_DIR, format!("https://{host}:{port}"))
    }

    /// Reads `token`, `namespace` and the optional `ca.crt` from `dir`.
    pub fn from_service_account_dir(
        dir: impl AsRef<Path>,
        api_server: impl Into<String>,
    ) -> Result<Self, PodflowError> {
        let dir = dir.as_ref();
        let token = std::fs::read_to_string(dir.join("token"))?;
        let namespace = std::fs::read_to_string(dir.join("namespace"))?;
        let ca = match std::fs::read(dir.join("ca.crt")) {
            Ok(pem) => Some(Certificate::from_pem(&pem)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };
        Self::build(
            api_server.into(),
            namespace.trim().to_string(),
            token.trim().to_string(),
            ca,
        )
    }

    fn build(
        api_server: String,
        namespace: String,
        token: String,
        ca: Option<Certificate>,
    ) -> Result<Self, PodflowError> {
        let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(ca) = ca {
            builder = builder.add_root_certificate(ca);
        }
        Ok(Self {
            client: builder.build()?,
            api_server: api_server.trim_end_matches('/').to_string(),
            namespace,
            token,
        })
    }

    /// Namespace claims are deleted from.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// URL of the claim `name`.
    #[must_use]
    pub fn claim_url(&self, name: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/persistentvolumeclaims/{name}",
            self.api_server, self.namespace
        )
    }

    /// Deletes the claim `name`. Returns false if it did not exist.
    pub async fn delete_claim(&self, name: &str) -> Result<bool, PodflowError> {
        let response = self
            .client
            .delete(self.claim_url(name))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            warn!(claim = %name, namespace = %self.namespace, "Volume claim not found");
            return Ok(false);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        info!(claim = %name, namespace = %self.namespace, "Volume claim deleted");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_service_account_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token"), "abc\n").unwrap();
        std::fs::write(dir.path().join("namespace"), "kubeflow-user\n").unwrap();

        let reclaimer =
            KubernetesVolumeReclaimer::from_service_account_dir(dir.path(), "https://10.0.0.1:443/")
                .unwrap();

        assert_eq!(reclaimer.namespace(), "kubeflow-user");
        assert_eq!(
            reclaimer.claim_url("wf-abc-pipeline-data-volume"),
            "https://10.0.0.1:443/api/v1/namespaces/kubeflow-user/persistentvolumeclaims/wf-abc-pipeline-data-volume"
        );
    }

    #[test]
    fn test_missing_token_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = KubernetesVolumeReclaimer::from_service_account_dir(dir.path(), "https://k8s")
            .unwrap_err();
        assert!(matches!(err, PodflowError::Io(_)));
    }
}
