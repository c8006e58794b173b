//! runc OCI runtime installation (Linux only).

use crate::bootstrap::Step;
use crate::config::Config;
use crate::errors::FlexnodeResult;
use crate::platform::{command, Platform};
use crate::util;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

const RUNC_BINARY_PATH: &str = "/usr/bin/runc";
const RUNC_VERSION: &str = "1.1.14";

fn download_url(arch: &str) -> String {
    format!(
        "https://github.com/opencontainers/runc/releases/download/v{}/runc.{}",
        RUNC_VERSION, arch
    )
}

pub struct RuncInstaller {
    platform: Arc<Platform>,
}

impl RuncInstaller {
    pub fn new(_config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { platform }
    }

    async fn runc_installed() -> bool {
        if !util::file_exists(Path::new(RUNC_BINARY_PATH)) {
            return false;
        }
        command::run_with_output(RUNC_BINARY_PATH, &["--version"])
            .await
            .is_ok()
    }
}

#[async_trait]
impl Step for RuncInstaller {
    fn name(&self) -> &str {
        "RuncInstaller"
    }

    async fn is_completed(&self) -> bool {
        Self::runc_installed().await
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        let arch = util::host_architecture()?;
        let url = download_url(arch);
        let temp_file = self.platform.paths().temp_dir.join(format!("runc.{}", arch));
        let _ = tokio::fs::remove_file(&temp_file).await;

        tracing::info!(url = %url, "downloading runc");
        util::download::download_file(&url, &temp_file).await?;

        command::run_privileged(
            "install",
            &["-m", "0755", &temp_file.to_string_lossy(), RUNC_BINARY_PATH],
        )
        .await?;

        let _ = tokio::fs::remove_file(&temp_file).await;
        tracing::info!(path = RUNC_BINARY_PATH, "runc installed");
        Ok(())
    }
}

pub struct RuncUninstaller;

impl RuncUninstaller {
    pub fn new(_config: Arc<Config>, _platform: Arc<Platform>) -> Self {
        Self
    }
}

#[async_trait]
impl Step for RuncUninstaller {
    fn name(&self) -> &str {
        "RuncUninstaller"
    }

    async fn is_completed(&self) -> bool {
        !util::file_exists(Path::new(RUNC_BINARY_PATH))
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        util::remove_file_privileged(Path::new(RUNC_BINARY_PATH)).await?;
        tracing::info!("runc removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_url_is_a_versioned_github_release() {
        let url = download_url("amd64");
        assert!(url.starts_with("https://github.com/opencontainers/runc/releases/download/v"));
        assert!(url.ends_with("runc.amd64"));
    }
}
