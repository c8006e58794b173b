//! Node configuration loaded from a JSON file.
//!
//! One [`Config`] value is constructed at process start and shared (via `Arc`)
//! with the bootstrapper and every installer step. There is no global config
//! singleton; everything receives its dependencies explicitly.

use crate::errors::{FlexnodeError, FlexnodeResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    pub azure: AzureConfig,
    #[serde(default)]
    pub arc: ArcConfig,
    pub kubernetes: KubernetesConfig,
    pub containerd: ContainerdConfig,
    #[serde(default)]
    pub node: NodeConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureConfig {
    pub subscription_id: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_principal: Option<ServicePrincipal>,
    pub target_cluster: TargetCluster,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePrincipal {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetCluster {
    pub name: String,
    pub resource_group: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArcConfig {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub resource_group: String,
    /// Arc machine resource name; defaults to the host name when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_name: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Assign the required RBAC roles to the machine identity automatically.
    #[serde(default = "default_true")]
    pub auto_role_assignment: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesConfig {
    /// Kubernetes version without the leading `v`, e.g. "1.29.4".
    pub version: String,
    /// Override for the node binaries download URL. Two `{}` placeholders:
    /// version, then architecture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerdConfig {
    /// containerd version without the leading `v`, e.g. "1.7.20".
    pub version: String,
    #[serde(default = "default_pause_image")]
    pub pause_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default = "default_max_pods")]
    pub max_pods: u32,
    #[serde(default)]
    pub kubelet: KubeletConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeletConfig {
    #[serde(default = "default_eviction_hard")]
    pub eviction_hard: BTreeMap<String, String>,
    #[serde(default = "default_kube_reserved")]
    pub kube_reserved: BTreeMap<String, String>,
    #[serde(default = "default_image_gc_high")]
    pub image_gc_high_threshold: u32,
    #[serde(default = "default_image_gc_low")]
    pub image_gc_low_threshold: u32,
}

fn default_true() -> bool {
    true
}

fn default_max_pods() -> u32 {
    110
}

fn default_pause_image() -> String {
    "mcr.microsoft.com/oss/kubernetes/pause:3.6".to_string()
}

fn default_image_gc_high() -> u32 {
    85
}

fn default_image_gc_low() -> u32 {
    80
}

fn default_eviction_hard() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("memory.available".to_string(), "750Mi".to_string()),
        ("nodefs.available".to_string(), "10%".to_string()),
        ("nodefs.inodesFree".to_string(), "5%".to_string()),
    ])
}

fn default_kube_reserved() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("cpu".to_string(), "100m".to_string()),
        ("memory".to_string(), "1638Mi".to_string()),
    ])
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            labels: BTreeMap::new(),
            max_pods: default_max_pods(),
            kubelet: KubeletConfig::default(),
        }
    }
}

impl Default for KubeletConfig {
    fn default() -> Self {
        Self {
            eviction_hard: default_eviction_hard(),
            kube_reserved: default_kube_reserved(),
            image_gc_high_threshold: default_image_gc_high(),
            image_gc_low_threshold: default_image_gc_low(),
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> FlexnodeResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FlexnodeError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| {
            FlexnodeError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check required fields. Called by [`Config::load`]; callers constructing
    /// a `Config` directly should call it themselves.
    pub fn validate(&self) -> FlexnodeResult<()> {
        if self.azure.subscription_id.is_empty() {
            return Err(FlexnodeError::Config(
                "azure.subscriptionId is required".into(),
            ));
        }
        if self.azure.tenant_id.is_empty() {
            return Err(FlexnodeError::Config("azure.tenantId is required".into()));
        }
        if self.azure.target_cluster.name.is_empty()
            || self.azure.target_cluster.resource_group.is_empty()
        {
            return Err(FlexnodeError::Config(
                "azure.targetCluster.name and .resourceGroup are required".into(),
            ));
        }
        if self.kubernetes.version.is_empty() {
            return Err(FlexnodeError::Config(
                "kubernetes.version is required".into(),
            ));
        }
        if self.kubernetes.version.starts_with('v') {
            return Err(FlexnodeError::Config(
                "kubernetes.version must not include the leading 'v'".into(),
            ));
        }
        if self.containerd.version.is_empty() {
            return Err(FlexnodeError::Config(
                "containerd.version is required".into(),
            ));
        }
        if let Some(sp) = &self.azure.service_principal {
            if sp.client_id.is_empty() || sp.client_secret.is_empty() {
                return Err(FlexnodeError::Config(
                    "azure.servicePrincipal requires both clientId and clientSecret".into(),
                ));
            }
        }
        Ok(())
    }

    /// True when a service principal is configured for Arc onboarding.
    pub fn is_sp_configured(&self) -> bool {
        self.azure.service_principal.is_some()
    }

    /// Arc machine resource name, falling back to the host name.
    pub fn arc_machine_name(&self) -> String {
        if let Some(name) = &self.arc.machine_name {
            return name.clone();
        }
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "flexnode".to_string())
    }

    /// Arc resource group, falling back to the target cluster's group.
    pub fn arc_resource_group(&self) -> &str {
        if self.arc.resource_group.is_empty() {
            &self.azure.target_cluster.resource_group
        } else {
            &self.arc.resource_group
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"{
        "azure": {
            "subscriptionId": "00000000-0000-0000-0000-000000000000",
            "tenantId": "11111111-1111-1111-1111-111111111111",
            "targetCluster": { "name": "flex", "resourceGroup": "flex-rg" }
        },
        "arc": { "location": "eastus", "resourceGroup": "flex-rg" },
        "kubernetes": { "version": "1.29.4" },
        "containerd": { "version": "1.7.20" }
    }"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_minimal_config_applies_defaults() {
        let file = write_config(MINIMAL);
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.kubernetes.version, "1.29.4");
        assert_eq!(config.node.max_pods, 110);
        assert!(config.arc.auto_role_assignment);
        assert!(!config.is_sp_configured());
        assert_eq!(config.arc_resource_group(), "flex-rg");
        assert!(config
            .node
            .kubelet
            .eviction_hard
            .contains_key("memory.available"));
    }

    #[test]
    fn load_rejects_missing_subscription() {
        let file = write_config(
            r#"{
                "azure": {
                    "subscriptionId": "",
                    "tenantId": "t",
                    "targetCluster": { "name": "c", "resourceGroup": "rg" }
                },
                "kubernetes": { "version": "1.29.4" },
                "containerd": { "version": "1.7.20" }
            }"#,
        );
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("subscriptionId"));
    }

    #[test]
    fn load_rejects_v_prefixed_kubernetes_version() {
        let with_v = MINIMAL.replace("1.29.4", "v1.29.4");
        let file = write_config(&with_v);
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("leading 'v'"));
    }

    #[test]
    fn load_rejects_unknown_fields() {
        let file = write_config(r#"{ "azure": {}, "bogus": true }"#);
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn arc_resource_group_falls_back_to_cluster_group() {
        let file = write_config(MINIMAL);
        let mut config = Config::load(file.path()).unwrap();
        config.arc.resource_group = String::new();
        assert_eq!(config.arc_resource_group(), "flex-rg");
    }
}
