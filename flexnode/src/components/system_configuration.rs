//! Host OS preparation for running Kubernetes workloads.

use crate::bootstrap::Step;
use crate::config::Config;
use crate::errors::FlexnodeResult;
use crate::platform::{command, Platform};
use crate::util;
use async_trait::async_trait;
use std::sync::Arc;

#[cfg(target_os = "linux")]
const MODULES_CONF_PATH: &str = "/etc/modules-load.d/flexnode.conf";
#[cfg(target_os = "linux")]
const SYSCTL_CONF_PATH: &str = "/etc/sysctl.d/90-flexnode.conf";
#[cfg(target_os = "linux")]
const KERNEL_MODULES: &[&str] = &["overlay", "br_netfilter"];

#[cfg(target_os = "linux")]
const SYSCTL_SETTINGS: &str = "net.bridge.bridge-nf-call-iptables = 1\n\
net.bridge.bridge-nf-call-ip6tables = 1\n\
net.ipv4.ip_forward = 1\n\
vm.overcommit_memory = 1\n\
kernel.panic = 10\n\
kernel.panic_on_oops = 1\n";

#[cfg(target_os = "windows")]
const FIREWALL_RULES: &[(&str, &str)] = &[
    ("kubelet", "10250"),
    ("kubelet-healthz", "10248"),
    ("kubelet-readonly", "10255"),
];

pub struct SystemConfigurationInstaller {
    platform: Arc<Platform>,
}

impl SystemConfigurationInstaller {
    pub fn new(_config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { platform }
    }

    #[cfg(target_os = "linux")]
    async fn disable_swap(&self) -> FlexnodeResult<()> {
        command::run_privileged("swapoff", &["-a"]).await?;
        // Keep swap off across reboots.
        command::run_privileged(
            "bash",
            &["-c", "sed -i '/\\sswap\\s/s/^/#/' /etc/fstab"],
        )
        .await
    }

    #[cfg(target_os = "linux")]
    async fn load_kernel_modules(&self) -> FlexnodeResult<()> {
        for module in KERNEL_MODULES {
            command::run_privileged("modprobe", &[module]).await?;
        }
        let conf = KERNEL_MODULES.join("\n") + "\n";
        util::write_file_privileged(
            std::path::Path::new(MODULES_CONF_PATH),
            conf.as_bytes(),
            "0644",
        )
        .await
    }

    #[cfg(target_os = "linux")]
    async fn apply_sysctls(&self) -> FlexnodeResult<()> {
        util::write_file_privileged(
            std::path::Path::new(SYSCTL_CONF_PATH),
            SYSCTL_SETTINGS.as_bytes(),
            "0644",
        )
        .await?;
        command::run_privileged("sysctl", &["--system"]).await
    }

    async fn create_directories(&self) -> FlexnodeResult<()> {
        let paths = self.platform.paths();
        for dir in [
            &paths.kubernetes_config_dir,
            &paths.kubelet_data_dir,
            &paths.kubelet_manifests_dir,
            &paths.cni_bin_dir,
            &paths.cni_conf_dir,
        ] {
            util::create_dir_privileged(dir).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Step for SystemConfigurationInstaller {
    fn name(&self) -> &str {
        "SystemConfigured"
    }

    async fn is_completed(&self) -> bool {
        let paths = self.platform.paths();
        let dirs_ready = util::directory_exists(&paths.kubernetes_config_dir)
            && util::directory_exists(&paths.kubelet_data_dir);
        #[cfg(target_os = "linux")]
        return dirs_ready
            && util::file_exists(std::path::Path::new(SYSCTL_CONF_PATH))
            && util::file_exists(std::path::Path::new(MODULES_CONF_PATH));
        #[cfg(target_os = "windows")]
        dirs_ready
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        tracing::info!("applying system configuration");
        #[cfg(target_os = "linux")]
        {
            self.disable_swap().await?;
            self.load_kernel_modules().await?;
            self.apply_sysctls().await?;
        }
        #[cfg(target_os = "windows")]
        {
            // Older Windows builds forward by default; treat failures as
            // advisory like the firewall rules below.
            if let Err(e) = command::run(
                "powershell",
                &[
                    "-Command",
                    "Set-NetIPInterface -Forwarding Enabled -PolicyStore ActiveStore",
                ],
            )
            .await
            {
                tracing::warn!(error = %e, "failed to enable IP forwarding");
            }
            for (name, port) in FIREWALL_RULES {
                let _ = command::run(
                    "netsh",
                    &[
                        "advfirewall",
                        "firewall",
                        "add",
                        "rule",
                        &format!("name={}", name),
                        "dir=in",
                        "action=allow",
                        "protocol=tcp",
                        &format!("localport={}", port),
                    ],
                )
                .await;
            }
        }
        self.create_directories().await?;
        tracing::info!("system configuration applied");
        Ok(())
    }
}

pub struct SystemConfigurationUninstaller {
    platform: Arc<Platform>,
}

impl SystemConfigurationUninstaller {
    pub fn new(_config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Step for SystemConfigurationUninstaller {
    fn name(&self) -> &str {
        "SystemCleanup"
    }

    async fn is_completed(&self) -> bool {
        #[cfg(target_os = "linux")]
        return !util::file_exists(std::path::Path::new(SYSCTL_CONF_PATH))
            && !util::file_exists(std::path::Path::new(MODULES_CONF_PATH));
        #[cfg(target_os = "windows")]
        false
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        tracing::info!("removing system configuration");
        #[cfg(target_os = "linux")]
        {
            util::remove_file_privileged(std::path::Path::new(SYSCTL_CONF_PATH)).await?;
            util::remove_file_privileged(std::path::Path::new(MODULES_CONF_PATH)).await?;
        }
        #[cfg(target_os = "windows")]
        for (name, _) in FIREWALL_RULES {
            let _ = command::run(
                "netsh",
                &[
                    "advfirewall",
                    "firewall",
                    "delete",
                    "rule",
                    &format!("name={}", name),
                ],
            )
            .await;
        }
        util::remove_dir_privileged(&self.platform.paths().kubernetes_config_dir).await?;
        tracing::info!("system configuration removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn sysctl_settings_enable_bridged_traffic_and_forwarding() {
        assert!(SYSCTL_SETTINGS.contains("net.bridge.bridge-nf-call-iptables = 1"));
        assert!(SYSCTL_SETTINGS.contains("net.ipv4.ip_forward = 1"));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn required_kernel_modules_are_listed() {
        assert_eq!(KERNEL_MODULES, &["overlay", "br_netfilter"]);
    }
}
