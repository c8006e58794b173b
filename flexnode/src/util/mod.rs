//! Shared helpers for host-state mutation: downloads, archives, atomic file
//! writes, and small formatting utilities used by the installers.

pub mod archive;
pub mod download;

use crate::errors::{FlexnodeError, FlexnodeResult};
#[cfg(target_os = "linux")]
use crate::platform::command;
use std::collections::BTreeMap;
use std::path::Path;

/// Check whether a file exists (follows symlinks).
pub fn file_exists(path: &Path) -> bool {
    path.is_file()
}

/// Check whether a directory exists.
pub fn directory_exists(path: &Path) -> bool {
    path.is_dir()
}

/// Check whether a binary is resolvable through `PATH`.
pub fn binary_on_path(name: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| {
        let candidate = dir.join(name);
        candidate.is_file()
    })
}

/// Write a file atomically into a system location.
///
/// On Linux the content is staged in a temp file, then moved into place with
/// elevated privileges so writes to /etc and friends work for a non-root
/// invoker. The copy-into-place keeps readers from ever observing a
/// half-written file. On Windows the process runs elevated and writes
/// directly.
pub async fn write_file_privileged(path: &Path, content: &[u8], mode: &str) -> FlexnodeResult<()> {
    #[cfg(target_os = "linux")]
    {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FlexnodeError::Internal(format!("invalid path: {}", path.display())))?;

        let staging = std::env::temp_dir().join(format!("flexnode-{}.tmp", file_name));
        tokio::fs::write(&staging, content).await?;

        if let Some(parent) = path.parent() {
            command::run_privileged("mkdir", &["-p", &parent.to_string_lossy()]).await?;
        }
        command::run_privileged("cp", &[&staging.to_string_lossy(), &path.to_string_lossy()])
            .await?;
        command::run_privileged("chmod", &[mode, &path.to_string_lossy()]).await?;

        let _ = tokio::fs::remove_file(&staging).await;
        Ok(())
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = mode;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

/// Remove a file from a system location, ignoring a missing target.
pub async fn remove_file_privileged(path: &Path) -> FlexnodeResult<()> {
    #[cfg(target_os = "linux")]
    return command::run_privileged("rm", &["-f", &path.to_string_lossy()]).await;
    #[cfg(not(target_os = "linux"))]
    {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Remove a directory tree from a system location, ignoring a missing target.
pub async fn remove_dir_privileged(path: &Path) -> FlexnodeResult<()> {
    #[cfg(target_os = "linux")]
    return command::run_privileged("rm", &["-rf", &path.to_string_lossy()]).await;
    #[cfg(not(target_os = "linux"))]
    {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Create a directory tree in a system location.
pub async fn create_dir_privileged(path: &Path) -> FlexnodeResult<()> {
    #[cfg(target_os = "linux")]
    return command::run_privileged("mkdir", &["-p", &path.to_string_lossy()]).await;
    #[cfg(not(target_os = "linux"))]
    {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }
}

/// Host architecture in the naming scheme release artifacts use.
pub fn host_architecture() -> FlexnodeResult<&'static str> {
    match std::env::consts::ARCH {
        "x86_64" => Ok("amd64"),
        "aarch64" => Ok("arm64"),
        other => Err(FlexnodeError::Internal(format!(
            "unsupported architecture: {}",
            other
        ))),
    }
}

/// Join a map into `key=value` pairs with the given separator.
///
/// Ordered input (BTreeMap) keeps the rendered flags stable across runs so
/// completion checks can compare file content byte-for-byte.
pub fn map_to_key_value_pairs(map: &BTreeMap<String, String>, separator: &str) -> String {
    map.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(separator)
}

/// Join eviction thresholds into kubelet's `signal<limit>` flag syntax.
pub fn map_to_eviction_thresholds(map: &BTreeMap<String, String>, separator: &str) -> String {
    map.iter()
        .map(|(k, v)| format!("{}<{}", k, v))
        .collect::<Vec<_>>()
        .join(separator)
}
