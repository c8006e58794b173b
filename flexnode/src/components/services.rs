//! Service lifecycle steps: enable/start on install, stop/disable on cleanup.

use crate::bootstrap::Step;
use crate::config::Config;
use crate::errors::{FlexnodeError, FlexnodeResult};
use crate::platform::Platform;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const CONTAINERD_SERVICE: &str = "containerd";
const KUBELET_SERVICE: &str = "kubelet";
#[cfg(target_os = "linux")]
const NPD_SERVICE: &str = "node-problem-detector";

const KUBELET_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ServicesInstaller {
    platform: Arc<Platform>,
}

impl ServicesInstaller {
    pub fn new(_config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { platform }
    }

    async fn enable_and_start(&self, name: &str) -> FlexnodeResult<()> {
        let service = self.platform.service();
        service
            .enable(name)
            .await
            .map_err(|e| FlexnodeError::Service(format!("failed to enable {}: {}", name, e)))?;
        service
            .start(name)
            .await
            .map_err(|e| FlexnodeError::Service(format!("failed to start {}: {}", name, e)))
    }
}

#[async_trait]
impl Step for ServicesInstaller {
    fn name(&self) -> &str {
        "ServicesEnabled"
    }

    /// Always runs; services are re-enabled on every bootstrap so a re-run
    /// recovers from a manually stopped node.
    async fn is_completed(&self) -> bool {
        false
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        let service = self.platform.service();
        service.reload_daemon().await?;

        tracing::info!("enabling and starting containerd");
        self.enable_and_start(CONTAINERD_SERVICE).await?;
        // Restart so containerd re-reads the CNI configuration written after
        // its first start.
        service.restart(CONTAINERD_SERVICE).await?;

        tracing::info!("enabling and starting kubelet");
        self.enable_and_start(KUBELET_SERVICE).await?;
        service
            .wait_active(KUBELET_SERVICE, KUBELET_STARTUP_TIMEOUT)
            .await?;

        #[cfg(target_os = "linux")]
        if let Err(e) = self.enable_and_start(NPD_SERVICE).await {
            // NPD is optional monitoring; its absence never fails a bootstrap.
            tracing::warn!(error = %e, "node-problem-detector did not start");
        }

        tracing::info!("services enabled and started");
        Ok(())
    }
}

pub struct ServicesUninstaller {
    platform: Arc<Platform>,
}

impl ServicesUninstaller {
    pub fn new(_config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { platform }
    }

    async fn stop_and_disable(&self, name: &str) {
        let service = self.platform.service();
        if !service.exists(name).await {
            return;
        }
        tracing::info!(service = name, "stopping and disabling");
        if let Err(e) = service.stop(name).await {
            tracing::warn!(service = name, error = %e, "stop failed");
        }
        if let Err(e) = service.disable(name).await {
            tracing::warn!(service = name, error = %e, "disable failed");
        }
    }
}

#[async_trait]
impl Step for ServicesUninstaller {
    fn name(&self) -> &str {
        "ServicesDisabled"
    }

    async fn is_completed(&self) -> bool {
        let service = self.platform.service();
        !service.is_active(CONTAINERD_SERVICE).await && !service.is_active(KUBELET_SERVICE).await
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        #[cfg(target_os = "linux")]
        self.stop_and_disable(NPD_SERVICE).await;
        self.stop_and_disable(KUBELET_SERVICE).await;
        self.stop_and_disable(CONTAINERD_SERVICE).await;
        tracing::info!("services stopped and disabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ServiceConfig, ServiceManager};
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// Service manager double recording calls, with a configurable set of
    /// existing/active services.
    struct FakeServiceManager {
        existing: BTreeSet<String>,
        active: Mutex<BTreeSet<String>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeServiceManager {
        fn new(existing: &[&str], active: &[&str]) -> Self {
            Self {
                existing: existing.iter().map(|s| s.to_string()).collect(),
                active: Mutex::new(active.iter().map(|s| s.to_string()).collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl ServiceManager for FakeServiceManager {
        async fn install(&self, config: &ServiceConfig) -> FlexnodeResult<()> {
            self.record(format!("install {}", config.name));
            Ok(())
        }
        async fn uninstall(&self, name: &str) -> FlexnodeResult<()> {
            self.record(format!("uninstall {}", name));
            Ok(())
        }
        async fn start(&self, name: &str) -> FlexnodeResult<()> {
            self.record(format!("start {}", name));
            self.active.lock().unwrap().insert(name.to_string());
            Ok(())
        }
        async fn stop(&self, name: &str) -> FlexnodeResult<()> {
            self.record(format!("stop {}", name));
            self.active.lock().unwrap().remove(name);
            Ok(())
        }
        async fn restart(&self, name: &str) -> FlexnodeResult<()> {
            self.record(format!("restart {}", name));
            Ok(())
        }
        async fn enable(&self, name: &str) -> FlexnodeResult<()> {
            self.record(format!("enable {}", name));
            Ok(())
        }
        async fn disable(&self, name: &str) -> FlexnodeResult<()> {
            self.record(format!("disable {}", name));
            Ok(())
        }
        async fn is_active(&self, name: &str) -> bool {
            self.active.lock().unwrap().contains(name)
        }
        async fn is_enabled(&self, _name: &str) -> bool {
            true
        }
        async fn exists(&self, name: &str) -> bool {
            self.existing.contains(name)
        }
        async fn wait_active(&self, name: &str, _timeout: Duration) -> FlexnodeResult<()> {
            if self.is_active(name).await {
                Ok(())
            } else {
                Err(FlexnodeError::Service(format!("{} not active", name)))
            }
        }
        async fn reload_daemon(&self) -> FlexnodeResult<()> {
            self.record("daemon-reload".into());
            Ok(())
        }
    }

    fn platform_with(fake: FakeServiceManager) -> Arc<Platform> {
        Arc::new(Platform::with_service_manager(Box::new(fake)))
    }

    #[tokio::test]
    async fn installer_starts_containerd_then_kubelet() {
        let platform = platform_with(FakeServiceManager::new(
            &[CONTAINERD_SERVICE, KUBELET_SERVICE],
            &[],
        ));
        let installer = ServicesInstaller::new(Arc::new(Config::default()), Arc::clone(&platform));

        installer.execute().await.unwrap();

        assert!(platform.service().is_active(CONTAINERD_SERVICE).await);
        assert!(platform.service().is_active(KUBELET_SERVICE).await);
    }

    #[tokio::test]
    async fn installer_never_reports_completed() {
        let platform = platform_with(FakeServiceManager::new(&[], &[]));
        let installer = ServicesInstaller::new(Arc::new(Config::default()), platform);
        assert!(!installer.is_completed().await);
    }

    #[tokio::test]
    async fn uninstaller_stops_all_running_services() {
        let platform = platform_with(FakeServiceManager::new(
            &[CONTAINERD_SERVICE, KUBELET_SERVICE],
            &[CONTAINERD_SERVICE, KUBELET_SERVICE],
        ));
        let uninstaller =
            ServicesUninstaller::new(Arc::new(Config::default()), Arc::clone(&platform));

        assert!(!uninstaller.is_completed().await);
        uninstaller.execute().await.unwrap();
        assert!(uninstaller.is_completed().await);
    }

    #[tokio::test]
    async fn uninstaller_skips_missing_services() {
        let platform = platform_with(FakeServiceManager::new(&[], &[]));
        let uninstaller = ServicesUninstaller::new(Arc::new(Config::default()), platform);
        // No services registered at all; cleanup still succeeds.
        uninstaller.execute().await.unwrap();
        assert!(uninstaller.is_completed().await);
    }
}
