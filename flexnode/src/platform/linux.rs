//! systemd service management.

use super::{command, RestartPolicy, ServiceConfig, ServiceManager};
use crate::errors::{FlexnodeError, FlexnodeResult};
use crate::util;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

const SERVICE_DIR: &str = "/etc/systemd/system";
const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct SystemdManager;

impl SystemdManager {
    pub fn new() -> Self {
        Self
    }

    fn unit_path(name: &str) -> PathBuf {
        PathBuf::from(SERVICE_DIR).join(format!("{}.service", name))
    }

    fn render_unit(config: &ServiceConfig) -> String {
        let mut unit = String::new();
        unit.push_str("[Unit]\n");
        unit.push_str(&format!("Description={}\n", config.description));
        for dep in &config.dependencies {
            unit.push_str(&format!("After={}.service\n", dep));
            unit.push_str(&format!("Requires={}.service\n", dep));
        }

        unit.push_str("\n[Service]\n");
        match config.restart {
            Some(RestartPolicy::Always) | None => unit.push_str("Restart=always\n"),
            Some(RestartPolicy::OnFailure) => unit.push_str("Restart=on-failure\n"),
            Some(RestartPolicy::Never) => unit.push_str("Restart=no\n"),
        }
        if let Some(delay) = config.restart_delay {
            unit.push_str(&format!("RestartSec={}\n", delay.as_secs()));
        }
        for (key, value) in &config.environment {
            unit.push_str(&format!("Environment={}={}\n", key, value));
        }
        if let Some(dir) = &config.working_dir {
            unit.push_str(&format!("WorkingDirectory={}\n", dir));
        }
        let mut exec = config.binary_path.clone();
        for arg in &config.args {
            exec.push(' ');
            exec.push_str(arg);
        }
        unit.push_str(&format!("ExecStart={}\n", exec));

        unit.push_str("\n[Install]\nWantedBy=multi-user.target\n");
        unit
    }
}

#[async_trait]
impl ServiceManager for SystemdManager {
    async fn install(&self, config: &ServiceConfig) -> FlexnodeResult<()> {
        let unit = Self::render_unit(config);
        util::write_file_privileged(&Self::unit_path(&config.name), unit.as_bytes(), "0644")
            .await?;
        self.reload_daemon().await
    }

    async fn uninstall(&self, name: &str) -> FlexnodeResult<()> {
        util::remove_file_privileged(&Self::unit_path(name)).await?;
        self.reload_daemon().await
    }

    async fn start(&self, name: &str) -> FlexnodeResult<()> {
        command::run_privileged("systemctl", &["start", name]).await
    }

    async fn stop(&self, name: &str) -> FlexnodeResult<()> {
        command::run_privileged("systemctl", &["stop", name]).await
    }

    async fn restart(&self, name: &str) -> FlexnodeResult<()> {
        command::run_privileged("systemctl", &["restart", name]).await
    }

    async fn enable(&self, name: &str) -> FlexnodeResult<()> {
        command::run_privileged("systemctl", &["enable", name]).await
    }

    async fn disable(&self, name: &str) -> FlexnodeResult<()> {
        command::run_privileged("systemctl", &["disable", name]).await
    }

    async fn is_active(&self, name: &str) -> bool {
        command::run_privileged("systemctl", &["is-active", "--quiet", name])
            .await
            .is_ok()
    }

    async fn is_enabled(&self, name: &str) -> bool {
        command::run_privileged("systemctl", &["is-enabled", "--quiet", name])
            .await
            .is_ok()
    }

    async fn exists(&self, name: &str) -> bool {
        match command::run_privileged_with_output(
            "systemctl",
            &["list-unit-files", &format!("{}.service", name)],
        )
        .await
        {
            Ok(output) => output.contains(&format!("{}.service", name)),
            Err(_) => false,
        }
    }

    async fn wait_active(&self, name: &str, timeout: Duration) -> FlexnodeResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_active(name).await {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(FlexnodeError::Service(format!(
                    "service {} did not become active within {:?}",
                    name, timeout
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn reload_daemon(&self) -> FlexnodeResult<()> {
        command::run_privileged("systemctl", &["daemon-reload"]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_unit_includes_dependencies_and_environment() {
        let config = ServiceConfig {
            name: "kubelet".into(),
            description: "Kubelet".into(),
            binary_path: "/usr/local/bin/kubelet".into(),
            args: vec!["--v=2".into()],
            dependencies: vec!["containerd".into()],
            environment: [("KUBELET_FLAGS".to_string(), "--max-pods=110".to_string())]
                .into_iter()
                .collect(),
            restart: Some(RestartPolicy::Always),
            restart_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };

        let unit = SystemdManager::render_unit(&config);
        assert!(unit.contains("Description=Kubelet"));
        assert!(unit.contains("After=containerd.service"));
        assert!(unit.contains("Restart=always"));
        assert!(unit.contains("RestartSec=5"));
        assert!(unit.contains("Environment=KUBELET_FLAGS=--max-pods=110"));
        assert!(unit.contains("ExecStart=/usr/local/bin/kubelet --v=2"));
        assert!(unit.contains("WantedBy=multi-user.target"));
    }

    #[test]
    fn unit_path_lands_in_systemd_dir() {
        assert_eq!(
            SystemdManager::unit_path("containerd"),
            PathBuf::from("/etc/systemd/system/containerd.service")
        );
    }
}
