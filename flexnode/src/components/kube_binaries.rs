//! Kubernetes node binaries (kubelet, kubectl, kubeadm).

use crate::bootstrap::Step;
use crate::config::Config;
use crate::errors::{FlexnodeError, FlexnodeResult};
use crate::platform::{command, Platform};
use crate::util;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

const BINARIES: &[&str] = &["kubelet", "kubectl", "kubeadm"];

pub struct KubeBinariesInstaller {
    config: Arc<Config>,
    platform: Arc<Platform>,
}

impl KubeBinariesInstaller {
    pub fn new(config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { config, platform }
    }

    fn binary_paths(&self) -> Vec<PathBuf> {
        let paths = self.platform.paths();
        BINARIES
            .iter()
            .map(|b| {
                paths
                    .kubelet_bin_dir
                    .join(format!("{}{}", b, paths.executable_ext))
            })
            .collect()
    }

    fn download_url(&self, arch: &str) -> (String, String) {
        let version = &self.config.kubernetes.version;
        let os = self.platform.os().as_str();
        let arch = if cfg!(windows) { "amd64" } else { arch };
        let file_name = format!("kubernetes-node-{}-{}.tar.gz", os, arch);
        let url = match &self.config.kubernetes.url_template {
            Some(template) => template
                .replacen("{}", version, 1)
                .replacen("{}", arch, 1),
            None => format!(
                "https://acs-mirror.azureedge.net/kubernetes/v{}/binaries/{}",
                version, file_name
            ),
        };
        (file_name, url)
    }

    async fn kubelet_version_correct(&self) -> bool {
        let kubelet = self.platform.paths().kubelet_binary();
        match command::run_with_output(&kubelet.to_string_lossy(), &["--version"]).await {
            Ok(output) => output.contains(&self.config.kubernetes.version),
            Err(_) => false,
        }
    }

    async fn binaries_current(&self) -> bool {
        for path in self.binary_paths() {
            if !util::file_exists(&path) {
                return false;
            }
        }
        self.kubelet_version_correct().await
    }

    async fn remove_stale_installation(&self) {
        #[cfg(target_os = "linux")]
        command::run_cleanup("pkill", &["-f", "kubelet"]).await;
        for path in self.binary_paths() {
            let _ = util::remove_file_privileged(&path).await;
        }
    }
}

#[async_trait]
impl Step for KubeBinariesInstaller {
    fn name(&self) -> &str {
        "KubeBinariesInstaller"
    }

    async fn validate(&self) -> FlexnodeResult<()> {
        if self.config.kubernetes.version.is_empty() {
            return Err(FlexnodeError::Validation(
                "kubernetes version not specified".into(),
            ));
        }
        Ok(())
    }

    async fn is_completed(&self) -> bool {
        self.binaries_current().await
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        tracing::info!(version = %self.config.kubernetes.version, "installing Kubernetes binaries");
        self.remove_stale_installation().await;

        let arch = util::host_architecture()?;
        let (file_name, url) = self.download_url(arch);
        let temp_file = self.platform.paths().temp_dir.join(&file_name);
        let _ = tokio::fs::remove_file(&temp_file).await;

        tracing::info!(url = %url, "downloading Kubernetes node binaries");
        util::download::download_file(&url, &temp_file).await?;

        let bin_dir = &self.platform.paths().kubelet_bin_dir;
        util::create_dir_privileged(bin_dir).await?;

        tracing::info!(destination = %bin_dir.display(), "extracting Kubernetes binaries");
        #[cfg(target_os = "linux")]
        {
            // Strip the kubernetes/node/bin/ prefix from the tarball.
            command::run_privileged(
                "tar",
                &[
                    "-C",
                    &bin_dir.to_string_lossy(),
                    "--strip-components=3",
                    "-xzf",
                    &temp_file.to_string_lossy(),
                    "kubernetes/node/bin/",
                ],
            )
            .await?;
            for path in self.binary_paths() {
                command::run_privileged("chmod", &["0755", &path.to_string_lossy()]).await?;
            }
        }
        #[cfg(target_os = "windows")]
        {
            let extract_dir = self.platform.paths().temp_dir.join("k8s-extract");
            let _ = tokio::fs::remove_dir_all(&extract_dir).await;
            tokio::fs::create_dir_all(&extract_dir).await?;
            util::archive::extract_tar_gz(&temp_file, &extract_dir, 0)?;

            let src_dir = extract_dir.join("kubernetes").join("node").join("bin");
            for binary in BINARIES.iter().chain(["kube-proxy"].iter()) {
                let file = format!("{}.exe", binary);
                let src = src_dir.join(&file);
                if !util::file_exists(&src) {
                    continue;
                }
                tokio::fs::copy(&src, bin_dir.join(&file)).await?;
            }
            let _ = tokio::fs::remove_dir_all(&extract_dir).await;
        }

        let _ = tokio::fs::remove_file(&temp_file).await;
        tracing::info!("Kubernetes binaries installed");
        Ok(())
    }
}

pub struct KubeBinariesUninstaller {
    platform: Arc<Platform>,
}

impl KubeBinariesUninstaller {
    pub fn new(_config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Step for KubeBinariesUninstaller {
    fn name(&self) -> &str {
        "KubeBinariesUninstaller"
    }

    async fn is_completed(&self) -> bool {
        let paths = self.platform.paths();
        BINARIES.iter().all(|b| {
            !util::file_exists(
                &paths
                    .kubelet_bin_dir
                    .join(format!("{}{}", b, paths.executable_ext)),
            )
        })
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        #[cfg(target_os = "linux")]
        command::run_cleanup("pkill", &["-f", "kubelet"]).await;

        let paths = self.platform.paths();
        for binary in BINARIES {
            let path = paths
                .kubelet_bin_dir
                .join(format!("{}{}", binary, paths.executable_ext));
            util::remove_file_privileged(&path).await?;
        }
        tracing::info!("Kubernetes binaries removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installer(template: Option<&str>) -> KubeBinariesInstaller {
        let mut config = Config::default();
        config.kubernetes.version = "1.29.4".into();
        config.kubernetes.url_template = template.map(String::from);
        KubeBinariesInstaller::new(Arc::new(config), Arc::new(Platform::host()))
    }

    #[test]
    fn default_download_url_is_versioned() {
        let (file_name, url) = installer(None).download_url("amd64");
        assert!(url.contains("/kubernetes/v1.29.4/binaries/"));
        assert!(url.ends_with(&file_name));
    }

    #[test]
    fn template_override_substitutes_version_and_arch() {
        let (_, url) = installer(Some("https://mirror.example.com/k8s/{}/node-{}.tar.gz"))
            .download_url("arm64");
        assert_eq!(url, "https://mirror.example.com/k8s/1.29.4/node-arm64.tar.gz");
    }

    #[test]
    fn binary_paths_cover_all_node_binaries() {
        let paths = installer(None).binary_paths();
        assert_eq!(paths.len(), 3);
        #[cfg(target_os = "linux")]
        assert!(paths.contains(&PathBuf::from("/usr/local/bin/kubectl")));
    }
}
