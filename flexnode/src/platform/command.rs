//! Host command execution.
//!
//! Installers shell out for most host mutations (package managers, systemctl,
//! tar, azcmagent). On Linux, commands that touch system state are re-run
//! through sudo when the process is not already root; on Windows the process
//! is expected to run elevated and commands execute directly.

use crate::errors::{FlexnodeError, FlexnodeResult};
use tokio::process::Command;

/// Commands that always require elevation on Linux.
#[cfg(target_os = "linux")]
const ALWAYS_PRIVILEGED: &[&str] = &[
    "apt", "apt-get", "dpkg", "systemctl", "mount", "umount", "modprobe", "sysctl", "swapoff",
    "azcmagent", "usermod", "kubectl", "pkill",
];

/// Commands that require elevation only when operating on system paths.
#[cfg(target_os = "linux")]
const PATH_CONDITIONAL: &[&str] = &[
    "mkdir", "cp", "chmod", "chown", "mv", "tar", "rm", "bash", "install", "ln", "cat", "wget",
];

/// Path prefixes owned by root.
#[cfg(target_os = "linux")]
const SYSTEM_PATHS: &[&str] = &["/etc/", "/usr/", "/var/", "/opt/", "/boot/", "/sys/", "/run/"];

#[cfg(target_os = "linux")]
fn requires_sudo(name: &str, args: &[&str]) -> bool {
    // SAFETY: geteuid is always safe to call.
    if unsafe { libc::geteuid() } == 0 {
        return false;
    }
    if ALWAYS_PRIVILEGED.contains(&name) {
        return true;
    }
    if PATH_CONDITIONAL.contains(&name) {
        return args
            .iter()
            .any(|arg| SYSTEM_PATHS.iter().any(|prefix| arg.starts_with(prefix)));
    }
    false
}

fn build_command(name: &str, args: &[&str], privileged: bool) -> Command {
    #[cfg(target_os = "linux")]
    {
        if privileged && requires_sudo(name, args) {
            let mut cmd = Command::new("sudo");
            cmd.arg(name).args(args);
            return cmd;
        }
    }
    let _ = privileged;
    let mut cmd = Command::new(name);
    cmd.args(args);
    cmd
}

async fn run_command(name: &str, args: &[&str], privileged: bool) -> FlexnodeResult<String> {
    let rendered = format!("{} {}", name, args.join(" "));
    tracing::debug!(command = %rendered, "running command");

    let output = build_command(name, args, privileged)
        .output()
        .await
        .map_err(|e| FlexnodeError::Command {
            command: rendered.clone(),
            message: format!("failed to spawn: {}", e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FlexnodeError::Command {
            command: rendered,
            message: format!(
                "exit {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a command, discarding output.
pub async fn run(name: &str, args: &[&str]) -> FlexnodeResult<()> {
    run_command(name, args, false).await.map(|_| ())
}

/// Run a command and return its stdout.
pub async fn run_with_output(name: &str, args: &[&str]) -> FlexnodeResult<String> {
    run_command(name, args, false).await
}

/// Run a command that mutates system state, elevating when needed.
pub async fn run_privileged(name: &str, args: &[&str]) -> FlexnodeResult<()> {
    run_command(name, args, true).await.map(|_| ())
}

/// Run a privileged command and return its stdout.
pub async fn run_privileged_with_output(name: &str, args: &[&str]) -> FlexnodeResult<String> {
    run_command(name, args, true).await
}

/// Best-effort cleanup command; failures are logged, never propagated.
pub async fn run_cleanup(name: &str, args: &[&str]) {
    if let Err(e) = run_command(name, args, true).await {
        tracing::debug!(error = %e, "cleanup command failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_with_output_captures_stdout() {
        let out = run_with_output("echo", &["flexnode"]).await.unwrap();
        assert_eq!(out.trim(), "flexnode");
    }

    #[tokio::test]
    async fn run_surfaces_nonzero_exit() {
        let err = run("false", &[]).await.unwrap_err();
        assert!(matches!(err, FlexnodeError::Command { .. }));
    }

    #[tokio::test]
    async fn run_surfaces_missing_binary() {
        let err = run("flexnode-no-such-binary", &[]).await.unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
