//! Windows SCM service management via `sc.exe` and PowerShell.

use super::{command, ServiceConfig, ServiceManager};
use crate::errors::{FlexnodeError, FlexnodeResult};
use async_trait::async_trait;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct ScmManager;

impl ScmManager {
    pub fn new() -> Self {
        Self
    }

    async fn query_state(name: &str) -> Option<String> {
        let output = command::run_with_output("sc.exe", &["query", name])
            .await
            .ok()?;
        output
            .lines()
            .find(|line| line.trim_start().starts_with("STATE"))
            .map(|line| line.trim().to_string())
    }
}

#[async_trait]
impl ServiceManager for ScmManager {
    async fn install(&self, config: &ServiceConfig) -> FlexnodeResult<()> {
        let mut bin_path = config.binary_path.clone();
        for arg in &config.args {
            bin_path.push(' ');
            bin_path.push_str(arg);
        }
        // sc.exe create requires the trailing space after binPath=
        command::run(
            "sc.exe",
            &[
                "create",
                &config.name,
                &format!("binPath= {}", bin_path),
                "start=",
                "auto",
                &format!("DisplayName= {}", config.display_name),
            ],
        )
        .await?;
        if !config.description.is_empty() {
            command::run(
                "sc.exe",
                &["description", &config.name, &config.description],
            )
            .await?;
        }
        for dep in &config.dependencies {
            command::run("sc.exe", &["config", &config.name, &format!("depend= {}", dep)])
                .await?;
        }
        Ok(())
    }

    async fn uninstall(&self, name: &str) -> FlexnodeResult<()> {
        command::run("sc.exe", &["delete", name]).await
    }

    async fn start(&self, name: &str) -> FlexnodeResult<()> {
        command::run("sc.exe", &["start", name]).await
    }

    async fn stop(&self, name: &str) -> FlexnodeResult<()> {
        command::run("sc.exe", &["stop", name]).await
    }

    async fn restart(&self, name: &str) -> FlexnodeResult<()> {
        let _ = self.stop(name).await;
        self.start(name).await
    }

    async fn enable(&self, name: &str) -> FlexnodeResult<()> {
        command::run("sc.exe", &["config", name, "start=", "auto"]).await
    }

    async fn disable(&self, name: &str) -> FlexnodeResult<()> {
        command::run("sc.exe", &["config", name, "start=", "disabled"]).await
    }

    async fn is_active(&self, name: &str) -> bool {
        matches!(Self::query_state(name).await, Some(state) if state.contains("RUNNING"))
    }

    async fn is_enabled(&self, name: &str) -> bool {
        match command::run_with_output("sc.exe", &["qc", name]).await {
            Ok(output) => output.contains("AUTO_START"),
            Err(_) => false,
        }
    }

    async fn exists(&self, name: &str) -> bool {
        Self::query_state(name).await.is_some()
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
        // The SCM has no daemon-reload equivalent.
        Ok(())
    }
}
