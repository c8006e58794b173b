//! containerd runtime installation and configuration.

use crate::bootstrap::Step;
use crate::config::Config;
use crate::errors::{FlexnodeError, FlexnodeResult};
use crate::platform::{command, Platform};
use crate::util;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

const METRICS_ADDRESS: &str = "0.0.0.0:10257";

#[cfg(target_os = "linux")]
const BINARIES: &[&str] = &[
    "ctr",
    "containerd",
    "containerd-shim",
    "containerd-shim-runc-v1",
    "containerd-shim-runc-v2",
    "containerd-stress",
];
#[cfg(target_os = "windows")]
const BINARIES: &[&str] = &["ctr.exe", "containerd.exe", "containerd-shim-runhcs-v1.exe"];

pub struct ContainerdInstaller {
    config: Arc<Config>,
    platform: Arc<Platform>,
}

impl ContainerdInstaller {
    pub fn new(config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { config, platform }
    }

    fn config_file(&self) -> PathBuf {
        self.platform
            .paths()
            .containerd_config_dir
            .join("config.toml")
    }

    fn download_url(&self, arch: &str) -> (String, String) {
        let version = &self.config.containerd.version;
        let os = self.platform.os().as_str();
        // Windows release artifacts only exist for amd64.
        let arch = if cfg!(windows) { "amd64" } else { arch };
        let file_name = format!("containerd-{}-{}-{}.tar.gz", version, os, arch);
        let url = match &self.config.containerd.url_template {
            Some(template) => template
                .replacen("{}", version, 1)
                .replacen("{}", arch, 1),
            None => format!(
                "https://github.com/containerd/containerd/releases/download/v{}/{}",
                version, file_name
            ),
        };
        (file_name, url)
    }

    async fn binaries_current(&self) -> bool {
        let bin_dir = &self.platform.paths().containerd_bin_dir;
        for binary in BINARIES {
            if !util::file_exists(&bin_dir.join(binary)) {
                return false;
            }
        }
        let containerd = self.platform.paths().containerd_binary();
        match command::run_with_output(&containerd.to_string_lossy(), &["--version"]).await {
            Ok(output) => output.contains(&self.config.containerd.version),
            Err(_) => false,
        }
    }

    async fn prepare_directories(&self) -> FlexnodeResult<()> {
        let paths = self.platform.paths();
        for dir in [&paths.containerd_config_dir, &paths.containerd_data_dir] {
            util::create_dir_privileged(dir).await?;
        }
        Ok(())
    }

    async fn remove_stale_installation(&self) {
        let service = self.platform.service();
        if service.exists("containerd").await {
            let _ = service.stop("containerd").await;
        }
        #[cfg(target_os = "linux")]
        command::run_cleanup("pkill", &["-f", "containerd"]).await;

        let bin_dir = &self.platform.paths().containerd_bin_dir;
        for binary in BINARIES {
            let _ = util::remove_file_privileged(&bin_dir.join(binary)).await;
        }
    }

    async fn install_binaries(&self) -> FlexnodeResult<()> {
        if self.binaries_current().await {
            tracing::info!(
                version = %self.config.containerd.version,
                "containerd already installed, keeping binaries"
            );
            return Ok(());
        }

        // A partial earlier install would leave mixed-version binaries.
        self.remove_stale_installation().await;

        let arch = util::host_architecture()?;
        let (file_name, url) = self.download_url(arch);
        let temp_file = self.platform.paths().temp_dir.join(&file_name);
        let _ = tokio::fs::remove_file(&temp_file).await;

        tracing::info!(url = %url, "downloading containerd");
        util::download::download_file(&url, &temp_file).await?;

        let bin_dir = &self.platform.paths().containerd_bin_dir;
        tracing::info!(destination = %bin_dir.display(), "extracting containerd binaries");
        #[cfg(target_os = "linux")]
        {
            // The release tarball nests everything under bin/.
            command::run_privileged(
                "tar",
                &[
                    "-C",
                    &bin_dir.to_string_lossy(),
                    "--strip-components=1",
                    "-xzf",
                    &temp_file.to_string_lossy(),
                    "bin/",
                ],
            )
            .await?;
            for binary in BINARIES {
                command::run_privileged("chmod", &["0755", &bin_dir.join(binary).to_string_lossy()])
                    .await?;
            }
        }
        #[cfg(target_os = "windows")]
        util::archive::extract_tar_gz(
            &temp_file,
            &self.platform.paths().containerd_config_dir,
            0,
        )?;

        let _ = tokio::fs::remove_file(&temp_file).await;
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn render_config(&self) -> String {
        let paths = self.platform.paths();
        format!(
            r#"version = 2
oom_score = 0
[plugins."io.containerd.grpc.v1.cri"]
  sandbox_image = "{pause}"
  [plugins."io.containerd.grpc.v1.cri".containerd]
    default_runtime_name = "runc"
    [plugins."io.containerd.grpc.v1.cri".containerd.runtimes.runc]
      runtime_type = "io.containerd.runc.v2"
    [plugins."io.containerd.grpc.v1.cri".containerd.runtimes.runc.options]
      BinaryName = "/usr/bin/runc"
      SystemdCgroup = true
  [plugins."io.containerd.grpc.v1.cri".cni]
    bin_dir = "{cni_bin}"
    conf_dir = "{cni_conf}"
  [plugins."io.containerd.grpc.v1.cri".registry]
    config_path = "/etc/containerd/certs.d"
[metrics]
  address = "{metrics}"
"#,
            pause = self.config.containerd.pause_image,
            cni_bin = paths.cni_bin_dir.display(),
            cni_conf = paths.cni_conf_dir.display(),
            metrics = METRICS_ADDRESS,
        )
    }

    #[cfg(target_os = "windows")]
    fn render_config(&self) -> String {
        let paths = self.platform.paths();
        format!(
            r#"version = 2
[plugins."io.containerd.grpc.v1.cri"]
  sandbox_image = "{pause}"
  [plugins."io.containerd.grpc.v1.cri".containerd]
    default_runtime_name = "runhcs-wcow-process"
    [plugins."io.containerd.grpc.v1.cri".containerd.runtimes.runhcs-wcow-process]
      runtime_type = "io.containerd.runhcs.v1"
  [plugins."io.containerd.grpc.v1.cri".cni]
    bin_dir = "{cni_bin}"
    conf_dir = "{cni_conf}"
[metrics]
  address = "{metrics}"
"#,
            pause = self.config.containerd.pause_image,
            cni_bin = paths.cni_bin_dir.display(),
            cni_conf = paths.cni_conf_dir.display(),
            metrics = METRICS_ADDRESS,
        )
    }

    async fn configure(&self) -> FlexnodeResult<()> {
        util::write_file_privileged(&self.config_file(), self.render_config().as_bytes(), "0644")
            .await?;

        #[cfg(target_os = "linux")]
        {
            util::write_file_privileged(
                &self.platform.paths().service_dir.join("containerd.service"),
                SYSTEMD_UNIT.as_bytes(),
                "0644",
            )
            .await?;
            self.platform.service().reload_daemon().await?;
        }
        #[cfg(target_os = "windows")]
        {
            let containerd = self.platform.paths().containerd_binary();
            let result = command::run(
                &containerd.to_string_lossy(),
                &[
                    "--register-service",
                    "--config",
                    &self.config_file().to_string_lossy(),
                ],
            )
            .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "built-in service registration failed, using SCM");
                let svc = crate::platform::ServiceConfig {
                    name: "containerd".into(),
                    display_name: "containerd container runtime".into(),
                    description: "containerd container runtime for Kubernetes".into(),
                    binary_path: containerd.to_string_lossy().into_owned(),
                    args: vec![
                        "--config".into(),
                        self.config_file().to_string_lossy().into_owned(),
                    ],
                    restart: Some(crate::platform::RestartPolicy::Always),
                    ..Default::default()
                };
                self.platform.service().install(&svc).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Step for ContainerdInstaller {
    fn name(&self) -> &str {
        "ContainerdInstaller"
    }

    async fn is_completed(&self) -> bool {
        if !self.binaries_current().await {
            return false;
        }
        if !util::file_exists(&self.config_file()) {
            return false;
        }
        #[cfg(target_os = "linux")]
        {
            let unit = self.platform.paths().service_dir.join("containerd.service");
            util::file_exists(&unit)
                && command::run_privileged("systemctl", &["check", "containerd"])
                    .await
                    .is_ok()
        }
        #[cfg(target_os = "windows")]
        self.platform.service().exists("containerd").await
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        self.prepare_directories().await?;
        tracing::info!(version = %self.config.containerd.version, "installing containerd");
        self.install_binaries().await?;
        self.configure().await?;
        tracing::info!("containerd installed and configured");
        Ok(())
    }
}

pub struct ContainerdUninstaller {
    platform: Arc<Platform>,
}

impl ContainerdUninstaller {
    pub fn new(_config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Step for ContainerdUninstaller {
    fn name(&self) -> &str {
        "ContainerdUninstaller"
    }

    async fn is_completed(&self) -> bool {
        !util::file_exists(&self.platform.paths().containerd_binary())
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        let service = self.platform.service();
        if service.exists("containerd").await {
            let _ = service.stop("containerd").await;
            let _ = service.uninstall("containerd").await;
        }
        #[cfg(target_os = "linux")]
        command::run_cleanup("pkill", &["-f", "containerd"]).await;

        let paths = self.platform.paths();
        let bin_dir = &paths.containerd_bin_dir;
        for binary in BINARIES {
            util::remove_file_privileged(&bin_dir.join(binary)).await?;
        }
        util::remove_dir_privileged(&paths.containerd_config_dir).await?;
        util::remove_dir_privileged(&paths.containerd_data_dir).await?;

        #[cfg(target_os = "linux")]
        {
            util::remove_file_privileged(&paths.service_dir.join("containerd.service")).await?;
            self.platform.service().reload_daemon().await?;
        }

        tracing::info!("containerd removed");
        Ok(())
    }
}

#[cfg(target_os = "linux")]
const SYSTEMD_UNIT: &str = r#"[Unit]
Description=containerd container runtime
Documentation=https://containerd.io
After=network.target local-fs.target
[Service]
ExecStartPre=-/sbin/modprobe overlay
ExecStart=/usr/bin/containerd
Type=notify
Delegate=yes
KillMode=process
Restart=always
RestartSec=5
LimitNPROC=infinity
LimitCORE=infinity
LimitNOFILE=infinity
TasksMax=infinity
OOMScoreAdjust=-999
[Install]
WantedBy=multi-user.target
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn installer() -> ContainerdInstaller {
        let mut config = Config::default();
        config.containerd.version = "1.7.20".into();
        config.containerd.pause_image = "mcr.microsoft.com/oss/kubernetes/pause:3.6".into();
        ContainerdInstaller::new(Arc::new(config), Arc::new(Platform::host()))
    }

    #[test]
    fn download_url_points_at_versioned_release() {
        let (file_name, url) = installer().download_url("amd64");
        assert!(url.starts_with("https://github.com/containerd/containerd/releases/download/v1.7.20/"));
        assert!(url.ends_with(&file_name));
        assert!(file_name.contains("1.7.20"));
    }

    #[test]
    fn download_url_honors_template_override() {
        let mut config = Config::default();
        config.containerd.version = "1.7.20".into();
        config.containerd.url_template =
            Some("https://mirror.example.com/containerd/{}/{}.tar.gz".into());
        let installer = ContainerdInstaller::new(Arc::new(config), Arc::new(Platform::host()));
        let (_, url) = installer.download_url("arm64");
        assert_eq!(url, "https://mirror.example.com/containerd/1.7.20/arm64.tar.gz");
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn rendered_config_pins_runtime_and_pause_image() {
        let rendered = installer().render_config();
        assert!(rendered.contains("sandbox_image = \"mcr.microsoft.com/oss/kubernetes/pause:3.6\""));
        assert!(rendered.contains("SystemdCgroup = true"));
        assert!(rendered.contains("bin_dir = \"/opt/cni/bin\""));
    }
}
