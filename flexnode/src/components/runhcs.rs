//! runhcs shim verification (Windows only).
//!
//! runhcs ships inside the containerd release archive, so this step verifies
//! the shim landed next to containerd rather than downloading anything.

use crate::bootstrap::Step;
use crate::config::Config;
use crate::errors::{FlexnodeError, FlexnodeResult};
use crate::platform::Platform;
use crate::util;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

const SHIM_BINARY: &str = "containerd-shim-runhcs-v1.exe";

pub struct RunhcsInstaller {
    platform: Arc<Platform>,
}

impl RunhcsInstaller {
    pub fn new(_config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { platform }
    }

    fn shim_path(&self) -> PathBuf {
        self.platform.paths().containerd_bin_dir.join(SHIM_BINARY)
    }
}

#[async_trait]
impl Step for RunhcsInstaller {
    fn name(&self) -> &str {
        "RunhcsInstaller"
    }

    async fn validate(&self) -> FlexnodeResult<()> {
        let bin_dir = &self.platform.paths().containerd_bin_dir;
        if !util::directory_exists(bin_dir) {
            return Err(FlexnodeError::Validation(format!(
                "containerd bin directory {} does not exist, install containerd first",
                bin_dir.display()
            )));
        }
        Ok(())
    }

    async fn is_completed(&self) -> bool {
        util::file_exists(&self.shim_path())
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        let shim = self.shim_path();
        if !util::file_exists(&shim) {
            return Err(FlexnodeError::Validation(format!(
                "runhcs shim not found at {}, containerd installation is incomplete",
                shim.display()
            )));
        }
        tracing::info!(path = %shim.display(), "runhcs shim verified");
        Ok(())
    }
}

pub struct RunhcsUninstaller {
    platform: Arc<Platform>,
}

impl RunhcsUninstaller {
    pub fn new(_config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Step for RunhcsUninstaller {
    fn name(&self) -> &str {
        "RunhcsUninstaller"
    }

    async fn is_completed(&self) -> bool {
        !util::file_exists(&self.platform.paths().containerd_bin_dir.join(SHIM_BINARY))
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        let shim = self.platform.paths().containerd_bin_dir.join(SHIM_BINARY);
        util::remove_file_privileged(&shim).await?;
        tracing::info!("runhcs shim removed");
        Ok(())
    }
}
