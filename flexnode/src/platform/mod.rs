//! OS-specific host facilities.
//!
//! The same installer code runs on Linux and Windows worker nodes; the pieces
//! that genuinely differ (paths, service manager, privilege handling) live
//! behind this module, with the concrete implementation selected at compile
//! time:
//!
//! ```text
//! Platform
//!     ├── paths    → PathConfig (per-OS path table)
//!     └── service  → SystemdManager (Linux) / ScmManager (Windows)
//! ```

pub mod command;
pub mod paths;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "windows")]
mod windows;

use crate::errors::FlexnodeResult;
use async_trait::async_trait;
pub use paths::PathConfig;
use std::collections::BTreeMap;
use std::time::Duration;

/// Operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    Windows,
}

impl Os {
    pub fn as_str(self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Windows => "windows",
        }
    }
}

/// Service restart behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Always,
    OnFailure,
    Never,
}

/// Description of a system service to register.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub binary_path: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub dependencies: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub restart: Option<RestartPolicy>,
    pub restart_delay: Option<Duration>,
}

/// Service management for the current OS (systemd or the Windows SCM).
///
/// Implementations shell out; none of these calls are cheap. `is_active`,
/// `is_enabled` and `exists` are read-only probes safe to call from step
/// completion checks.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn install(&self, config: &ServiceConfig) -> FlexnodeResult<()>;
    async fn uninstall(&self, name: &str) -> FlexnodeResult<()>;
    async fn start(&self, name: &str) -> FlexnodeResult<()>;
    async fn stop(&self, name: &str) -> FlexnodeResult<()>;
    async fn restart(&self, name: &str) -> FlexnodeResult<()>;
    async fn enable(&self, name: &str) -> FlexnodeResult<()>;
    async fn disable(&self, name: &str) -> FlexnodeResult<()>;
    async fn is_active(&self, name: &str) -> bool;
    async fn is_enabled(&self, name: &str) -> bool;
    async fn exists(&self, name: &str) -> bool;

    /// Wait for a service to report active, polling until the timeout.
    async fn wait_active(&self, name: &str, timeout: Duration) -> FlexnodeResult<()>;

    /// Reload the service manager's own configuration (daemon-reload on
    /// Linux; a no-op on Windows).
    async fn reload_daemon(&self) -> FlexnodeResult<()>;
}

/// The host facilities handed to every step.
pub struct Platform {
    os: Os,
    paths: PathConfig,
    service: Box<dyn ServiceManager>,
}

impl Platform {
    /// Build the platform for the OS this binary was compiled for.
    pub fn host() -> Self {
        #[cfg(target_os = "linux")]
        {
            Self {
                os: Os::Linux,
                paths: PathConfig::host(),
                service: Box::new(linux::SystemdManager::new()),
            }
        }
        #[cfg(target_os = "windows")]
        {
            Self {
                os: Os::Windows,
                paths: PathConfig::host(),
                service: Box::new(windows::ScmManager::new()),
            }
        }
    }

    /// Build a platform with an injected service manager (tests).
    pub fn with_service_manager(service: Box<dyn ServiceManager>) -> Self {
        Self {
            #[cfg(target_os = "windows")]
            os: Os::Windows,
            #[cfg(not(target_os = "windows"))]
            os: Os::Linux,
            paths: PathConfig::host(),
            service,
        }
    }

    pub fn os(&self) -> Os {
        self.os
    }

    pub fn paths(&self) -> &PathConfig {
        &self.paths
    }

    pub fn service(&self) -> &dyn ServiceManager {
        self.service.as_ref()
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").field("os", &self.os).finish()
    }
}
