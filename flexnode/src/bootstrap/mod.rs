//! Bootstrap orchestration: the step runner plus the per-OS step lists.

mod executor;

#[cfg(target_os = "linux")]
#[path = "steps_linux.rs"]
mod steps;

#[cfg(target_os = "windows")]
#[path = "steps_windows.rs"]
mod steps;

pub use executor::{ExecutionMode, ExecutionResult, Step, StepResult, StepRunner};

use crate::config::Config;
use crate::errors::FlexnodeResult;
use crate::platform::Platform;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Drives a node through provisioning or cleanup.
pub struct Bootstrapper {
    config: Arc<Config>,
    platform: Arc<Platform>,
    runner: StepRunner,
}

impl Bootstrapper {
    pub fn new(config: Arc<Config>, platform: Arc<Platform>, cancel: CancellationToken) -> Self {
        Self {
            config,
            platform,
            runner: StepRunner::new(cancel),
        }
    }

    /// Provision the node, halting on the first failed step.
    pub async fn bootstrap(&self) -> FlexnodeResult<ExecutionResult> {
        let steps = steps::bootstrap_steps(&self.config, &self.platform);
        self.runner
            .execute_steps(&steps, ExecutionMode::Bootstrap)
            .await
    }

    /// Tear the node down, attempting every step regardless of failures.
    pub async fn unbootstrap(&self) -> FlexnodeResult<ExecutionResult> {
        let steps = steps::unbootstrap_steps(&self.config, &self.platform);
        self.runner
            .execute_steps(&steps, ExecutionMode::Unbootstrap)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_steps_are_ordered_for_dependencies() {
        let config = Arc::new(Config::default());
        let platform = Arc::new(Platform::host());
        let names: Vec<String> = steps::bootstrap_steps(&config, &platform)
            .iter()
            .map(|s| s.name().to_string())
            .collect();

        let position = |name: &str| {
            names
                .iter()
                .position(|n| n == name)
                .unwrap_or_else(|| panic!("missing step {}", name))
        };

        // The runtime must be in place before the binaries that talk to it,
        // and services start last.
        assert!(position("ContainerdInstaller") < position("KubeBinariesInstaller"));
        assert!(position("KubeBinariesInstaller") < position("CniInstaller"));
        assert!(position("CniInstaller") < position("KubeletInstaller"));
        assert_eq!(names.last().map(String::as_str), Some("ServicesEnabled"));
    }

    #[test]
    fn unbootstrap_stops_services_first() {
        let config = Arc::new(Config::default());
        let platform = Arc::new(Platform::host());
        let names: Vec<String> = steps::unbootstrap_steps(&config, &platform)
            .iter()
            .map(|s| s.name().to_string())
            .collect();

        assert_eq!(names.first().map(String::as_str), Some("ServicesDisabled"));
        assert!(names.iter().any(|n| n == "ContainerdUninstaller"));
        assert!(names.iter().any(|n| n == "KubeBinariesUninstaller"));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn linux_step_lists_match_expected_orderings() {
        let config = Arc::new(Config::default());
        let platform = Arc::new(Platform::host());

        let bootstrap: Vec<String> = steps::bootstrap_steps(&config, &platform)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(
            bootstrap,
            vec![
                "ArcInstall",
                "ServicesDisabled",
                "SystemConfigured",
                "RuncInstaller",
                "ContainerdInstaller",
                "KubeBinariesInstaller",
                "CniInstaller",
                "KubeletInstaller",
                "NpdInstaller",
                "ServicesEnabled",
            ]
        );

        let unbootstrap: Vec<String> = steps::unbootstrap_steps(&config, &platform)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(
            unbootstrap,
            vec![
                "ServicesDisabled",
                "NpdUninstaller",
                "KubeletUninstaller",
                "CniUninstaller",
                "KubeBinariesUninstaller",
                "ContainerdUninstaller",
                "RuncUninstaller",
                "SystemCleanup",
                "ArcUninstall",
            ]
        );
    }
}
