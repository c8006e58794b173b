//! Azure Arc agent setup and machine registration.
//!
//! The node's identity comes from Azure Arc: the agent is installed from the
//! vendor script, the machine is connected with `azcmagent connect`, and the
//! resulting managed identity is what every later Azure call authenticates
//! with. RBAC propagation is not instant, so registration is followed by a
//! bounded wait for the role assignments to become visible.

use crate::bootstrap::Step;
use crate::config::Config;
use crate::errors::{FlexnodeError, FlexnodeResult};
use crate::platform::{command, Platform};
use crate::util;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[cfg(target_os = "linux")]
const AGENT_SCRIPT_URL: &str = "https://aka.ms/azcmagent";
#[cfg(target_os = "linux")]
const AGENT_SCRIPT_PATH: &str = "/tmp/install_linux_azcmagent.sh";

/// Agent services that must be active for the machine to count as connected.
#[cfg(target_os = "linux")]
const AGENT_SERVICES: &[&str] = &["himdsd", "gcarcservice", "extd"];
#[cfg(target_os = "windows")]
const AGENT_SERVICES: &[&str] = &["himds", "GCArcService", "ExtensionService"];

/// Locations the vendor script has been observed to install the agent when it
/// does not end up on PATH.
#[cfg(target_os = "linux")]
const AGENT_FALLBACK_PATHS: &[&str] = &[
    "/opt/azcmagent/bin/azcmagent",
    "/usr/local/bin/azcmagent",
    "/usr/bin/azcmagent",
];

fn agent_binary_name() -> &'static str {
    if cfg!(windows) {
        "azcmagent.exe"
    } else {
        "azcmagent"
    }
}

async fn agent_connected() -> bool {
    // `azcmagent show` succeeds only on a connected machine.
    match command::run_privileged_with_output(agent_binary_name(), &["show"]).await {
        Ok(output) => output.contains("Connected"),
        Err(_) => false,
    }
}

pub struct ArcInstaller {
    config: Arc<Config>,
    platform: Arc<Platform>,
}

impl ArcInstaller {
    pub fn new(config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { config, platform }
    }

    #[cfg(target_os = "linux")]
    async fn install_agent(&self) -> FlexnodeResult<()> {
        if util::binary_on_path(agent_binary_name()) {
            tracing::info!("Arc agent already installed");
            return Ok(());
        }

        tracing::info!(url = AGENT_SCRIPT_URL, "downloading Arc agent install script");
        command::run_privileged("wget", &[AGENT_SCRIPT_URL, "-O", AGENT_SCRIPT_PATH]).await?;
        command::run_privileged("chmod", &["755", AGENT_SCRIPT_PATH]).await?;

        let result = command::run_privileged("bash", &[AGENT_SCRIPT_PATH]).await;
        command::run_cleanup("rm", &["-f", AGENT_SCRIPT_PATH]).await;
        result?;

        if !util::binary_on_path(agent_binary_name()) {
            // The script sometimes installs outside PATH. Link the binary in
            // rather than failing the whole bootstrap.
            let found = AGENT_FALLBACK_PATHS
                .iter()
                .find(|p| util::file_exists(Path::new(p)))
                .ok_or_else(|| {
                    FlexnodeError::Arc(
                        "agent install script completed but azcmagent is not available".into(),
                    )
                })?;
            tracing::info!(path = found, "linking Arc agent into PATH");
            command::run_privileged("ln", &["-sf", found, "/usr/local/bin/azcmagent"]).await?;
        }

        tracing::info!("Arc agent installed");
        Ok(())
    }

    #[cfg(target_os = "windows")]
    async fn install_agent(&self) -> FlexnodeResult<()> {
        if util::binary_on_path(agent_binary_name()) {
            tracing::info!("Arc agent already installed");
            return Ok(());
        }
        let script = self.platform.paths().temp_dir.join("install_windows_azcmagent.ps1");
        let script = script.to_string_lossy().into_owned();
        command::run(
            "powershell",
            &[
                "-Command",
                &format!(
                    "Invoke-WebRequest -UseBasicParsing -Uri https://aka.ms/azcmagent-windows -OutFile {0}; & {0}",
                    script
                ),
            ],
        )
        .await
        .map_err(|e| FlexnodeError::Arc(format!("agent install failed: {}", e)))
    }

    async fn connect_machine(&self) -> FlexnodeResult<()> {
        if agent_connected().await {
            tracing::info!("machine already connected to Azure Arc");
            return Ok(());
        }

        let machine_name = self.config.arc_machine_name();
        let mut args: Vec<String> = vec![
            "connect".into(),
            "--resource-group".into(),
            self.config.arc_resource_group().to_string(),
            "--tenant-id".into(),
            self.config.azure.tenant_id.clone(),
            "--location".into(),
            self.config.arc.location.clone(),
            "--subscription-id".into(),
            self.config.azure.subscription_id.clone(),
            "--resource-name".into(),
            machine_name.clone(),
        ];
        for (key, value) in &self.config.arc.tags {
            args.push("--tags".into());
            args.push(format!("{}={}", key, value));
        }
        if let Some(sp) = &self.config.azure.service_principal {
            args.push("--service-principal-id".into());
            args.push(sp.client_id.clone());
            args.push("--service-principal-secret".into());
            args.push(sp.client_secret.clone());
        }

        tracing::info!(machine = %machine_name, "connecting machine to Azure Arc");
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        command::run_privileged(agent_binary_name(), &arg_refs)
            .await
            .map_err(|e| FlexnodeError::Arc(format!("azcmagent connect failed: {}", e)))?;

        // Registration is not immediately visible after connect returns.
        tokio::time::sleep(Duration::from_secs(10)).await;
        if !agent_connected().await {
            return Err(FlexnodeError::Arc(
                "azcmagent connect completed but the machine does not report Connected".into(),
            ));
        }
        tracing::info!("machine connected to Azure Arc");
        Ok(())
    }

    async fn wait_for_identity(&self) -> FlexnodeResult<()> {
        if !self.config.arc.auto_role_assignment {
            tracing::info!("automatic role assignment disabled, roles must be assigned manually");
        }
        // Whether roles were assigned here or by the operator, the managed
        // identity endpoint must be serving before later steps can use it.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(120);
        loop {
            let mut ready = true;
            for service in AGENT_SERVICES {
                if !self.platform.service().is_active(service).await {
                    ready = false;
                    break;
                }
            }
            if ready {
                tracing::info!("Arc agent services are running");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(FlexnodeError::Arc(
                    "Arc agent services did not become active".into(),
                ));
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
}

#[async_trait]
impl Step for ArcInstaller {
    fn name(&self) -> &str {
        "ArcInstall"
    }

    async fn is_completed(&self) -> bool {
        if !util::binary_on_path(agent_binary_name()) {
            return false;
        }
        for service in AGENT_SERVICES {
            if !self.platform.service().is_active(service).await {
                return false;
            }
        }
        agent_connected().await
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        self.install_agent().await?;
        self.connect_machine().await?;
        self.wait_for_identity().await
    }
}

pub struct ArcUninstaller {
    platform: Arc<Platform>,
}

impl ArcUninstaller {
    pub fn new(_config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Step for ArcUninstaller {
    fn name(&self) -> &str {
        "ArcUninstall"
    }

    async fn is_completed(&self) -> bool {
        !util::binary_on_path(agent_binary_name())
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        // Disconnect is best-effort: a machine whose registration is already
        // gone server-side still needs the local agent removed.
        if let Err(e) = command::run_privileged(agent_binary_name(), &["disconnect"]).await {
            tracing::warn!(error = %e, "azcmagent disconnect failed, removing agent anyway");
        }

        #[cfg(target_os = "linux")]
        {
            command::run_cleanup("apt-get", &["remove", "-y", "azcmagent"]).await;
            command::run_cleanup("rm", &["-f", "/usr/local/bin/azcmagent"]).await;
        }
        #[cfg(target_os = "windows")]
        {
            command::run_cleanup(
                "powershell",
                &[
                    "-Command",
                    "Get-Package -Name 'Azure Connected Machine Agent' | Uninstall-Package -Force",
                ],
            )
            .await;
        }

        for service in AGENT_SERVICES {
            if self.platform.service().exists(service).await {
                let _ = self.platform.service().stop(service).await;
            }
        }
        tracing::info!("Arc agent removed");
        Ok(())
    }
}
