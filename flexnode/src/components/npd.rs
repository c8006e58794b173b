//! Node Problem Detector installation (Linux only).

use crate::bootstrap::Step;
use crate::config::Config;
use crate::errors::FlexnodeResult;
use crate::platform::{command, Platform};
use crate::util;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

const NPD_VERSION: &str = "0.8.19";
const NPD_BINARY_PATH: &str = "/usr/bin/node-problem-detector";
const NPD_CONFIG_DIR: &str = "/etc/node-problem-detector";
const NPD_CONFIG_PATH: &str = "/etc/node-problem-detector/kernel-monitor.json";
const NPD_SERVICE_PATH: &str = "/etc/systemd/system/node-problem-detector.service";
const NPD_TEMP_DIR: &str = "/tmp/npd";

fn download_url(arch: &str) -> (String, String) {
    let file_name = format!("npd-{}.tar.gz", arch);
    let url = format!(
        "https://github.com/kubernetes/node-problem-detector/releases/download/v{}/node-problem-detector-v{}-linux_{}.tar.gz",
        NPD_VERSION, NPD_VERSION, arch
    );
    (file_name, url)
}

const KERNEL_MONITOR_CONFIG: &str = r#"{
  "plugin": "kmsg",
  "logPath": "/dev/kmsg",
  "lookback": "5m",
  "bufferSize": 10,
  "source": "kernel-monitor",
  "conditions": [
    {
      "type": "KernelDeadlock",
      "reason": "KernelHasNoDeadlock",
      "message": "kernel has no deadlock"
    },
    {
      "type": "ReadonlyFilesystem",
      "reason": "FilesystemIsNotReadOnly",
      "message": "Filesystem is not read-only"
    }
  ],
  "rules": [
    {
      "type": "temporary",
      "reason": "OOMKilling",
      "pattern": "Killed process \\d+ (.+) total-vm:\\d+kB, anon-rss:\\d+kB, file-rss:\\d+kB.*"
    },
    {
      "type": "temporary",
      "reason": "TaskHung",
      "pattern": "task [\\S ]+:\\w+ blocked for more than \\w+ seconds\\."
    },
    {
      "type": "permanent",
      "condition": "KernelDeadlock",
      "reason": "AUFSUmountHung",
      "pattern": "task umount\\.aufs:\\w+ blocked for more than \\w+ seconds\\."
    },
    {
      "type": "permanent",
      "condition": "ReadonlyFilesystem",
      "reason": "FilesystemIsReadOnly",
      "pattern": "Remounting filesystem read-only"
    }
  ]
}
"#;

const SERVICE_UNIT: &str = r#"[Unit]
Description=Node Problem Detector
After=kubelet.service
[Service]
Restart=always
RestartSec=10
ExecStart=/usr/bin/node-problem-detector \
        --config.system-log-monitor=/etc/node-problem-detector/kernel-monitor.json \
        --kubeconfig=/var/lib/kubelet/kubeconfig
[Install]
WantedBy=multi-user.target
"#;

pub struct NpdInstaller {
    platform: Arc<Platform>,
}

impl NpdInstaller {
    pub fn new(_config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Step for NpdInstaller {
    fn name(&self) -> &str {
        "NpdInstaller"
    }

    async fn is_completed(&self) -> bool {
        util::file_exists(Path::new(NPD_BINARY_PATH))
            && util::file_exists(Path::new(NPD_CONFIG_PATH))
            && util::file_exists(Path::new(NPD_SERVICE_PATH))
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        let arch = util::host_architecture()?;
        let (file_name, url) = download_url(arch);
        let temp_file = self.platform.paths().temp_dir.join(&file_name);
        let _ = tokio::fs::remove_file(&temp_file).await;

        tracing::info!(url = %url, "downloading node-problem-detector");
        util::download::download_file(&url, &temp_file).await?;

        // The release tarball holds bin/node-problem-detector plus configs;
        // stage it in a scratch dir and install only the binary.
        let _ = tokio::fs::remove_dir_all(NPD_TEMP_DIR).await;
        tokio::fs::create_dir_all(NPD_TEMP_DIR).await?;
        util::archive::extract_tar_gz(&temp_file, Path::new(NPD_TEMP_DIR), 0)?;
        command::run_privileged(
            "install",
            &[
                "-m",
                "0755",
                &format!("{}/bin/node-problem-detector", NPD_TEMP_DIR),
                NPD_BINARY_PATH,
            ],
        )
        .await?;
        let _ = tokio::fs::remove_dir_all(NPD_TEMP_DIR).await;
        let _ = tokio::fs::remove_file(&temp_file).await;

        util::create_dir_privileged(Path::new(NPD_CONFIG_DIR)).await?;
        util::write_file_privileged(
            Path::new(NPD_CONFIG_PATH),
            KERNEL_MONITOR_CONFIG.as_bytes(),
            "0644",
        )
        .await?;
        util::write_file_privileged(Path::new(NPD_SERVICE_PATH), SERVICE_UNIT.as_bytes(), "0644")
            .await?;
        self.platform.service().reload_daemon().await?;

        tracing::info!("node-problem-detector installed");
        Ok(())
    }
}

pub struct NpdUninstaller {
    platform: Arc<Platform>,
}

impl NpdUninstaller {
    pub fn new(_config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Step for NpdUninstaller {
    fn name(&self) -> &str {
        "NpdUninstaller"
    }

    async fn is_completed(&self) -> bool {
        !util::file_exists(Path::new(NPD_BINARY_PATH))
            && !util::file_exists(Path::new(NPD_SERVICE_PATH))
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        let service = self.platform.service();
        if service.exists("node-problem-detector").await {
            let _ = service.stop("node-problem-detector").await;
            let _ = service.disable("node-problem-detector").await;
        }
        util::remove_file_privileged(Path::new(NPD_SERVICE_PATH)).await?;
        util::remove_file_privileged(Path::new(NPD_BINARY_PATH)).await?;
        util::remove_dir_privileged(Path::new(NPD_CONFIG_DIR)).await?;
        self.platform.service().reload_daemon().await?;
        tracing::info!("node-problem-detector removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_monitor_config_is_valid_json() {
        let parsed: serde_json::Value = serde_json::from_str(KERNEL_MONITOR_CONFIG).unwrap();
        assert_eq!(parsed["plugin"], "kmsg");
        assert!(parsed["rules"].as_array().unwrap().len() >= 2);
    }

    #[test]
    fn download_url_is_versioned_for_arch() {
        let (file_name, url) = download_url("amd64");
        assert_eq!(file_name, "npd-amd64.tar.gz");
        assert!(url.contains("node-problem-detector/releases/download/v"));
        assert!(url.ends_with("linux_amd64.tar.gz"));
    }
}
