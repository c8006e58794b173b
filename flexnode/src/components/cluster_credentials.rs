//! AKS cluster admin kubeconfig retrieval via the Arc managed identity.

use crate::auth::{ArcIdentityClient, ARM_RESOURCE};
use crate::bootstrap::Step;
use crate::config::Config;
use crate::errors::{FlexnodeError, FlexnodeResult};
use crate::platform::Platform;
use crate::util;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::sync::Arc;

const LIST_CREDENTIAL_API_VERSION: &str = "2024-05-01";

#[derive(Debug, Deserialize)]
struct CredentialResults {
    kubeconfigs: Vec<CredentialResult>,
}

#[derive(Debug, Deserialize)]
struct CredentialResult {
    #[allow(dead_code)]
    name: String,
    /// Base64-encoded kubeconfig.
    value: String,
}

pub struct ClusterCredentialsInstaller {
    config: Arc<Config>,
    platform: Arc<Platform>,
}

impl ClusterCredentialsInstaller {
    pub fn new(config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { config, platform }
    }

    fn list_credential_url(&self) -> String {
        format!(
            "https://management.azure.com/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerService/managedClusters/{}/listClusterAdminCredential?api-version={}",
            self.config.azure.subscription_id,
            self.config.azure.target_cluster.resource_group,
            self.config.azure.target_cluster.name,
            LIST_CREDENTIAL_API_VERSION,
        )
    }

    async fn fetch_kubeconfig(&self) -> FlexnodeResult<Vec<u8>> {
        let identity = ArcIdentityClient::new()?;
        let token = identity.token(ARM_RESOURCE).await?;

        let response = reqwest::Client::new()
            .post(self.list_credential_url())
            .bearer_auth(&token.access_token)
            .header("Content-Length", "0")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FlexnodeError::Arc(format!(
                "listClusterAdminCredential failed with {}: {}",
                status, body
            )));
        }

        let results = response.json::<CredentialResults>().await?;
        let credential = results.kubeconfigs.first().ok_or_else(|| {
            FlexnodeError::Arc("cluster returned no admin credentials".into())
        })?;
        let kubeconfig = base64::engine::general_purpose::STANDARD
            .decode(&credential.value)
            .map_err(|e| FlexnodeError::Arc(format!("kubeconfig is not valid base64: {}", e)))?;
        if kubeconfig.is_empty() {
            return Err(FlexnodeError::Arc("received empty kubeconfig".into()));
        }
        Ok(kubeconfig)
    }
}

#[async_trait]
impl Step for ClusterCredentialsInstaller {
    fn name(&self) -> &str {
        "ClusterCredentialsDownloaded"
    }

    async fn is_completed(&self) -> bool {
        util::file_exists(&self.platform.paths().admin_kubeconfig())
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        tracing::info!(
            cluster = %self.config.azure.target_cluster.name,
            resource_group = %self.config.azure.target_cluster.resource_group,
            "fetching cluster admin credentials"
        );
        let kubeconfig = self.fetch_kubeconfig().await?;
        tracing::info!(bytes = kubeconfig.len(), "retrieved cluster credentials");

        let path = self.platform.paths().admin_kubeconfig();
        util::create_dir_privileged(&self.platform.paths().kubernetes_config_dir).await?;
        // The kubeconfig holds cluster-admin material; keep it root-only.
        util::write_file_privileged(&path, &kubeconfig, "0600").await?;
        tracing::info!(path = %path.display(), "cluster credentials saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_credential_url_targets_the_configured_cluster() {
        let mut config = Config::default();
        config.azure.subscription_id = "sub-1".into();
        config.azure.target_cluster.name = "flex".into();
        config.azure.target_cluster.resource_group = "flex-rg".into();
        let installer =
            ClusterCredentialsInstaller::new(Arc::new(config), Arc::new(Platform::host()));

        let url = installer.list_credential_url();
        assert!(url.contains("/subscriptions/sub-1/"));
        assert!(url.contains("/resourceGroups/flex-rg/"));
        assert!(url.contains("/managedClusters/flex/listClusterAdminCredential"));
    }

    #[test]
    fn credential_results_decode_base64_kubeconfig() {
        let raw = r#"{"kubeconfigs":[{"name":"clusterAdmin","value":"YXBpVmVyc2lvbjogdjE="}]}"#;
        let results: CredentialResults = serde_json::from_str(raw).unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&results.kubeconfigs[0].value)
            .unwrap();
        assert_eq!(decoded, b"apiVersion: v1");
    }
}
