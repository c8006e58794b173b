//! Host path tables, resolved per OS at compile time.

use std::path::PathBuf;

/// OS-specific paths used by the installer steps.
///
/// One instance is built by [`super::Platform::host`] and shared by every
/// step; nothing here probes the host, it is pure data.
#[derive(Debug, Clone)]
pub struct PathConfig {
    // Container runtime
    pub containerd_bin_dir: PathBuf,
    pub containerd_config_dir: PathBuf,
    pub containerd_data_dir: PathBuf,
    pub containerd_socket: PathBuf,

    // Kubernetes
    pub kubelet_bin_dir: PathBuf,
    pub kubernetes_config_dir: PathBuf,
    pub kubelet_data_dir: PathBuf,
    pub kubelet_manifests_dir: PathBuf,
    pub kubelet_volume_plugin_dir: PathBuf,
    pub kubelet_dropin_dir: PathBuf,

    // CNI
    pub cni_bin_dir: PathBuf,
    pub cni_conf_dir: PathBuf,

    // System
    pub temp_dir: PathBuf,

    // Services
    pub service_dir: PathBuf,

    // File name extensions
    pub executable_ext: &'static str,
}

impl PathConfig {
    #[cfg(target_os = "linux")]
    pub fn host() -> Self {
        Self {
            containerd_bin_dir: "/usr/bin".into(),
            containerd_config_dir: "/etc/containerd".into(),
            containerd_data_dir: "/var/lib/containerd".into(),
            containerd_socket: "/run/containerd/containerd.sock".into(),

            kubelet_bin_dir: "/usr/local/bin".into(),
            kubernetes_config_dir: "/etc/kubernetes".into(),
            kubelet_data_dir: "/var/lib/kubelet".into(),
            kubelet_manifests_dir: "/etc/kubernetes/manifests".into(),
            kubelet_volume_plugin_dir: "/etc/kubernetes/volumeplugins".into(),
            kubelet_dropin_dir: "/etc/systemd/system/kubelet.service.d".into(),

            cni_bin_dir: "/opt/cni/bin".into(),
            cni_conf_dir: "/etc/cni/net.d".into(),

            temp_dir: "/tmp".into(),

            service_dir: "/etc/systemd/system".into(),

            executable_ext: "",
        }
    }

    #[cfg(target_os = "windows")]
    pub fn host() -> Self {
        Self {
            containerd_bin_dir: r"C:\Program Files\containerd\bin".into(),
            containerd_config_dir: r"C:\Program Files\containerd".into(),
            containerd_data_dir: r"C:\ProgramData\containerd".into(),
            containerd_socket: r"\\.\pipe\containerd-containerd".into(),

            kubelet_bin_dir: r"C:\k".into(),
            kubernetes_config_dir: r"C:\k\config".into(),
            kubelet_data_dir: r"C:\var\lib\kubelet".into(),
            kubelet_manifests_dir: r"C:\k\manifests".into(),
            kubelet_volume_plugin_dir: r"C:\k\volumeplugins".into(),
            kubelet_dropin_dir: r"C:\k\config".into(),

            cni_bin_dir: r"C:\k\cni".into(),
            cni_conf_dir: r"C:\k\cni\config".into(),

            temp_dir: r"C:\Windows\Temp".into(),

            service_dir: r"C:\k\services".into(),

            executable_ext: ".exe",
        }
    }

    /// Full path to the containerd binary.
    pub fn containerd_binary(&self) -> PathBuf {
        self.containerd_bin_dir
            .join(format!("containerd{}", self.executable_ext))
    }

    /// Full path to the kubelet binary.
    pub fn kubelet_binary(&self) -> PathBuf {
        self.kubelet_bin_dir
            .join(format!("kubelet{}", self.executable_ext))
    }

    /// Admin kubeconfig written by the cluster-credentials step.
    pub fn admin_kubeconfig(&self) -> PathBuf {
        self.kubernetes_config_dir.join("admin.conf")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn linux_paths_match_host_conventions() {
        let paths = PathConfig::host();
        assert_eq!(paths.containerd_binary(), PathBuf::from("/usr/bin/containerd"));
        assert_eq!(paths.kubelet_binary(), PathBuf::from("/usr/local/bin/kubelet"));
        assert_eq!(
            paths.admin_kubeconfig(),
            PathBuf::from("/etc/kubernetes/admin.conf")
        );
        assert_eq!(paths.executable_ext, "");
    }

    #[test]
    #[cfg(target_os = "windows")]
    fn windows_paths_use_exe_extension() {
        let paths = PathConfig::host();
        assert!(paths
            .kubelet_binary()
            .to_string_lossy()
            .ends_with("kubelet.exe"));
    }
}
