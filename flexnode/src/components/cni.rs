//! CNI plugin installation.
//!
//! Linux nodes get the reference containernetworking plugins plus a bridge
//! conflist; Windows nodes get the Calico for Windows package, matching what
//! AKS Arc deploys.

use crate::bootstrap::Step;
use crate::config::Config;
use crate::errors::FlexnodeResult;
use crate::platform::Platform;
use crate::util;
use async_trait::async_trait;
use std::sync::Arc;

#[cfg(target_os = "linux")]
const PLUGINS_VERSION: &str = "1.4.1";
#[cfg(target_os = "linux")]
const REQUIRED_PLUGINS: &[&str] = &["bridge", "host-local", "loopback", "portmap"];
#[cfg(target_os = "linux")]
const CONFLIST_NAME: &str = "10-flexnode.conflist";

#[cfg(target_os = "windows")]
const CALICO_VERSION: &str = "3.28.2";
#[cfg(target_os = "windows")]
const REQUIRED_PLUGINS: &[&str] = &["calico.exe", "calico-ipam.exe"];
#[cfg(target_os = "windows")]
const CONF_NAME: &str = "10-calico.conf";

pub struct CniInstaller {
    platform: Arc<Platform>,
}

impl CniInstaller {
    pub fn new(_config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { platform }
    }

    #[cfg(target_os = "linux")]
    fn render_conflist(&self) -> String {
        // Pod CIDR is assigned by the cluster; the bridge config only needs
        // a host-local placeholder range until the network addon takes over.
        serde_json::json!({
            "cniVersion": "0.3.1",
            "name": "flexnode",
            "plugins": [
                {
                    "type": "bridge",
                    "bridge": "cni0",
                    "isGateway": true,
                    "ipMasq": true,
                    "ipam": {
                        "type": "host-local",
                        "subnet": "10.244.0.0/16",
                        "routes": [{ "dst": "0.0.0.0/0" }]
                    }
                },
                { "type": "portmap", "capabilities": { "portMappings": true } }
            ]
        })
        .to_string()
    }

    #[cfg(target_os = "linux")]
    async fn install(&self) -> FlexnodeResult<()> {
        let paths = self.platform.paths();
        util::create_dir_privileged(&paths.cni_bin_dir).await?;
        util::create_dir_privileged(&paths.cni_conf_dir).await?;

        let arch = util::host_architecture()?;
        let file_name = format!("cni-plugins-linux-{}-v{}.tgz", arch, PLUGINS_VERSION);
        let url = format!(
            "https://github.com/containernetworking/plugins/releases/download/v{}/{}",
            PLUGINS_VERSION, file_name
        );
        let temp_file = paths.temp_dir.join(&file_name);
        let _ = tokio::fs::remove_file(&temp_file).await;

        tracing::info!(url = %url, "downloading CNI plugins");
        util::download::download_file(&url, &temp_file).await?;

        tracing::info!(destination = %paths.cni_bin_dir.display(), "extracting CNI plugins");
        crate::platform::command::run_privileged(
            "tar",
            &[
                "-C",
                &paths.cni_bin_dir.to_string_lossy(),
                "-xzf",
                &temp_file.to_string_lossy(),
            ],
        )
        .await?;
        let _ = tokio::fs::remove_file(&temp_file).await;

        util::write_file_privileged(
            &paths.cni_conf_dir.join(CONFLIST_NAME),
            self.render_conflist().as_bytes(),
            "0644",
        )
        .await?;
        tracing::info!("CNI plugins installed");
        Ok(())
    }

    #[cfg(target_os = "windows")]
    fn render_conf(&self) -> String {
        serde_json::json!({
            "cniVersion": "0.3.1",
            "name": "Calico",
            "type": "calico",
            "mode": "vxlan",
            "ipam": { "type": "calico-ipam" },
            "capabilities": { "dns": true }
        })
        .to_string()
    }

    #[cfg(target_os = "windows")]
    async fn install(&self) -> FlexnodeResult<()> {
        let paths = self.platform.paths();
        for dir in [&paths.cni_bin_dir, &paths.cni_conf_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }

        let file_name = format!("calico-windows-v{}.zip", CALICO_VERSION);
        let url = format!(
            "https://github.com/projectcalico/calico/releases/download/v{}/{}",
            CALICO_VERSION, file_name
        );
        let temp_file = paths.temp_dir.join(&file_name);
        let _ = tokio::fs::remove_file(&temp_file).await;

        tracing::info!(url = %url, "downloading Calico for Windows");
        util::download::download_file(&url, &temp_file).await?;

        let extract_dir = paths.temp_dir.join("calico-extract");
        let _ = tokio::fs::remove_dir_all(&extract_dir).await;
        crate::platform::command::run(
            "powershell",
            &[
                "-Command",
                &format!(
                    "Expand-Archive -Force -Path '{}' -DestinationPath '{}'",
                    temp_file.display(),
                    extract_dir.display()
                ),
            ],
        )
        .await?;

        // The package nests the plugins under CalicoWindows\cni.
        let plugin_src = extract_dir.join("CalicoWindows").join("cni");
        for plugin in REQUIRED_PLUGINS {
            let src = plugin_src.join(plugin);
            if util::file_exists(&src) {
                tokio::fs::copy(&src, paths.cni_bin_dir.join(plugin)).await?;
            }
        }

        tokio::fs::write(
            paths.cni_conf_dir.join(CONF_NAME),
            self.render_conf().as_bytes(),
        )
        .await?;

        let _ = tokio::fs::remove_dir_all(&extract_dir).await;
        let _ = tokio::fs::remove_file(&temp_file).await;
        tracing::info!("Calico CNI installed");
        Ok(())
    }
}

#[async_trait]
impl Step for CniInstaller {
    fn name(&self) -> &str {
        "CniInstaller"
    }

    async fn is_completed(&self) -> bool {
        let paths = self.platform.paths();
        for plugin in REQUIRED_PLUGINS {
            if !util::file_exists(&paths.cni_bin_dir.join(plugin)) {
                return false;
            }
        }
        #[cfg(target_os = "linux")]
        return util::file_exists(&paths.cni_conf_dir.join(CONFLIST_NAME));
        #[cfg(target_os = "windows")]
        util::file_exists(&paths.cni_conf_dir.join(CONF_NAME))
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        self.install().await
    }
}

pub struct CniUninstaller {
    platform: Arc<Platform>,
}

impl CniUninstaller {
    pub fn new(_config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Step for CniUninstaller {
    fn name(&self) -> &str {
        "CniUninstaller"
    }

    async fn is_completed(&self) -> bool {
        let paths = self.platform.paths();
        !util::directory_exists(&paths.cni_bin_dir) && !util::directory_exists(&paths.cni_conf_dir)
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        let paths = self.platform.paths();
        util::remove_dir_privileged(&paths.cni_conf_dir).await?;
        util::remove_dir_privileged(&paths.cni_bin_dir).await?;
        tracing::info!("CNI configuration removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn conflist_is_valid_json_with_bridge_plugin() {
        let installer = CniInstaller::new(Arc::new(Config::default()), Arc::new(Platform::host()));
        let rendered = installer.render_conflist();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["plugins"][0]["type"], "bridge");
        assert_eq!(parsed["plugins"][1]["type"], "portmap");
    }
}
