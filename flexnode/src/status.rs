//! Node provisioning status report.
//!
//! Backs the `status` subcommand: probes the host for installed binaries,
//! service liveness and Arc registration, and serializes the result.

use crate::config::Config;
use crate::platform::{command, Platform};
use crate::util;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub exists: bool,
    pub active: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArcStatus {
    pub agent_installed: bool,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub machine_name: String,
    pub os: String,
    pub collected_at: DateTime<Utc>,
    pub arc: ArcStatus,
    pub containerd: ComponentStatus,
    pub kubelet: ComponentStatus,
    pub services: std::collections::BTreeMap<String, ServiceStatus>,
    pub kubeconfig_present: bool,
}

impl NodeStatus {
    /// True when every piece a bootstrapped node needs is in place.
    pub fn ready(&self) -> bool {
        self.arc.connected
            && self.containerd.installed
            && self.kubelet.installed
            && self.kubeconfig_present
            && self
                .services
                .values()
                .all(|s| s.exists && s.active)
    }
}

pub struct StatusCollector {
    config: Arc<Config>,
    platform: Arc<Platform>,
}

impl StatusCollector {
    pub fn new(config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { config, platform }
    }

    pub async fn collect(&self) -> NodeStatus {
        let paths = self.platform.paths();

        let containerd = Self::probe_binary(&paths.containerd_binary(), &["--version"]).await;
        let kubelet = Self::probe_binary(&paths.kubelet_binary(), &["--version"]).await;

        let mut services = std::collections::BTreeMap::new();
        for name in ["containerd", "kubelet"] {
            services.insert(name.to_string(), self.probe_service(name).await);
        }

        NodeStatus {
            machine_name: self.config.arc_machine_name(),
            os: self.platform.os().as_str().to_string(),
            collected_at: Utc::now(),
            arc: self.probe_arc().await,
            containerd,
            kubelet,
            services,
            kubeconfig_present: util::file_exists(&paths.admin_kubeconfig()),
        }
    }

    async fn probe_binary(path: &std::path::Path, version_args: &[&str]) -> ComponentStatus {
        if !util::file_exists(path) {
            return ComponentStatus {
                installed: false,
                version: None,
            };
        }
        let version = command::run_with_output(&path.to_string_lossy(), version_args)
            .await
            .ok()
            .map(|out| out.lines().next().unwrap_or_default().trim().to_string());
        ComponentStatus {
            installed: true,
            version,
        }
    }

    async fn probe_service(&self, name: &str) -> ServiceStatus {
        let service = self.platform.service();
        ServiceStatus {
            exists: service.exists(name).await,
            active: service.is_active(name).await,
            enabled: service.is_enabled(name).await,
        }
    }

    async fn probe_arc(&self) -> ArcStatus {
        let binary = if cfg!(windows) { "azcmagent.exe" } else { "azcmagent" };
        let agent_installed = util::binary_on_path(binary);
        let connected = if agent_installed {
            match command::run_privileged_with_output(binary, &["show"]).await {
                Ok(output) => output.contains("Connected"),
                Err(_) => false,
            }
        } else {
            false
        };
        ArcStatus {
            agent_installed,
            connected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(ready: bool) -> NodeStatus {
        let component = ComponentStatus {
            installed: ready,
            version: ready.then(|| "v1.29.4".to_string()),
        };
        let service = ServiceStatus {
            exists: ready,
            active: ready,
            enabled: ready,
        };
        NodeStatus {
            machine_name: "node-1".into(),
            os: "linux".into(),
            collected_at: Utc::now(),
            arc: ArcStatus {
                agent_installed: ready,
                connected: ready,
            },
            containerd: component.clone(),
            kubelet: component,
            services: [
                ("containerd".to_string(), service.clone()),
                ("kubelet".to_string(), service),
            ]
            .into_iter()
            .collect(),
            kubeconfig_present: ready,
        }
    }

    #[test]
    fn ready_requires_every_component() {
        assert!(status(true).ready());
        assert!(!status(false).ready());

        let mut partial = status(true);
        partial.kubeconfig_present = false;
        assert!(!partial.ready());
    }

    #[test]
    fn serializes_to_camel_case_json() {
        let json = serde_json::to_string(&status(true)).unwrap();
        assert!(json.contains("\"machineName\":\"node-1\""));
        assert!(json.contains("\"agentInstalled\":true"));
        assert!(json.contains("\"kubeconfigPresent\":true"));
    }
}
