//! kubelet service configuration.
//!
//! The kubelet points at the admin kubeconfig fetched through the Arc managed
//! identity, so the credentials step runs from here when the kubeconfig is
//! missing rather than as a fixed entry in the step lists.

use crate::bootstrap::Step;
use crate::components::cluster_credentials::ClusterCredentialsInstaller;
use crate::config::Config;
use crate::errors::FlexnodeResult;
use crate::platform::Platform;
use crate::util;
use async_trait::async_trait;
use std::sync::Arc;

#[cfg(target_os = "linux")]
const DEFAULTS_PATH: &str = "/etc/default/kubelet";
#[cfg(target_os = "linux")]
const SERVICE_PATH: &str = "/etc/systemd/system/kubelet.service";
#[cfg(target_os = "linux")]
const CONTAINERD_DROPIN: &str = "/etc/systemd/system/kubelet.service.d/10-containerd.conf";

pub struct KubeletInstaller {
    config: Arc<Config>,
    platform: Arc<Platform>,
}

impl KubeletInstaller {
    pub fn new(config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { config, platform }
    }

    async fn ensure_cluster_credentials(&self) -> FlexnodeResult<()> {
        let credentials =
            ClusterCredentialsInstaller::new(Arc::clone(&self.config), Arc::clone(&self.platform));
        if credentials.is_completed().await {
            return Ok(());
        }
        credentials.validate().await?;
        credentials.execute().await
    }

    fn kubelet_flags(&self) -> String {
        let kubelet = &self.config.node.kubelet;
        let mut flags = vec![
            "--address=0.0.0.0".to_string(),
            "--anonymous-auth=false".to_string(),
            "--authentication-token-webhook=true".to_string(),
            "--authorization-mode=Webhook".to_string(),
        ];
        #[cfg(target_os = "linux")]
        flags.push("--cgroup-driver=systemd".to_string());
        flags.extend([
            format!(
                "--eviction-hard={}",
                util::map_to_eviction_thresholds(&kubelet.eviction_hard, ",")
            ),
            format!(
                "--kube-reserved={}",
                util::map_to_key_value_pairs(&kubelet.kube_reserved, ",")
            ),
            format!("--image-gc-high-threshold={}", kubelet.image_gc_high_threshold),
            format!("--image-gc-low-threshold={}", kubelet.image_gc_low_threshold),
            format!("--max-pods={}", self.config.node.max_pods),
            "--node-status-update-frequency=10s".to_string(),
            format!("--pod-infra-container-image={}", self.config.containerd.pause_image),
            "--protect-kernel-defaults=true".to_string(),
            "--read-only-port=0".to_string(),
            "--streaming-connection-idle-timeout=4h".to_string(),
        ]);
        flags.join(" ")
    }

    #[cfg(target_os = "linux")]
    fn render_defaults(&self) -> String {
        let labels = util::map_to_key_value_pairs(&self.config.node.labels, ",");
        format!(
            "KUBELET_NODE_LABELS=\"{labels}\"\n\
             KUBELET_CONFIG_FILE_FLAGS=\"--kubeconfig={kubeconfig}\"\n\
             KUBELET_TLS_BOOTSTRAP_FLAGS=\"\"\n\
             KUBELET_FLAGS=\"{flags} --resolv-conf=/run/systemd/resolve/resolv.conf\"\n",
            labels = labels,
            kubeconfig = self.platform.paths().admin_kubeconfig().display(),
            flags = self.kubelet_flags(),
        )
    }

    #[cfg(target_os = "linux")]
    fn render_service_unit(&self) -> String {
        let paths = self.platform.paths();
        format!(
            r#"[Unit]
Description=Kubelet
ConditionPathExists={kubelet}
[Service]
Restart=always
EnvironmentFile={defaults}
SuccessExitStatus=143
ExecStartPre=/bin/bash -c "if [ $(mount | grep \"{data}\" | wc -l) -le 0 ] ; then /bin/mount --bind {data} {data} ; fi"
ExecStartPre=/bin/mount --make-shared {data}
ExecStart={kubelet} \
        --enable-server \
        --node-labels="${{KUBELET_NODE_LABELS}}" \
        --v=2 \
        --volume-plugin-dir={volume_plugins} \
        --pod-manifest-path={manifests}/ \
        $KUBELET_TLS_BOOTSTRAP_FLAGS \
        $KUBELET_CONFIG_FILE_FLAGS \
        $KUBELET_CONTAINERD_FLAGS \
        $KUBELET_FLAGS
[Install]
WantedBy=multi-user.target
"#,
            kubelet = paths.kubelet_binary().display(),
            defaults = DEFAULTS_PATH,
            data = paths.kubelet_data_dir.display(),
            volume_plugins = paths.kubelet_volume_plugin_dir.display(),
            manifests = paths.kubelet_manifests_dir.display(),
        )
    }

    #[cfg(target_os = "linux")]
    async fn configure(&self) -> FlexnodeResult<()> {
        let paths = self.platform.paths();

        // Overwrite any stale configuration from an earlier attempt.
        for file in [DEFAULTS_PATH, SERVICE_PATH, CONTAINERD_DROPIN] {
            let _ = util::remove_file_privileged(std::path::Path::new(file)).await;
        }

        util::write_file_privileged(
            std::path::Path::new(DEFAULTS_PATH),
            self.render_defaults().as_bytes(),
            "0644",
        )
        .await?;

        let dropin = format!(
            "[Service]\nEnvironment=KUBELET_CONTAINERD_FLAGS=\"--runtime-request-timeout=15m --container-runtime-endpoint=unix://{}\"\n",
            paths.containerd_socket.display()
        );
        util::write_file_privileged(
            std::path::Path::new(CONTAINERD_DROPIN),
            dropin.as_bytes(),
            "0644",
        )
        .await?;

        util::write_file_privileged(
            std::path::Path::new(SERVICE_PATH),
            self.render_service_unit().as_bytes(),
            "0644",
        )
        .await?;

        for dir in [
            &paths.kubelet_data_dir,
            &paths.kubelet_manifests_dir,
            &paths.kubelet_volume_plugin_dir,
        ] {
            util::create_dir_privileged(dir).await?;
        }

        self.platform.service().reload_daemon().await
    }

    #[cfg(target_os = "windows")]
    async fn configure(&self) -> FlexnodeResult<()> {
        let paths = self.platform.paths();
        for dir in [
            &paths.kubernetes_config_dir,
            &paths.kubelet_data_dir,
            &paths.kubelet_manifests_dir,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut args: Vec<String> = self
            .kubelet_flags()
            .split(' ')
            .map(String::from)
            .collect();
        args.extend([
            "--windows-service".to_string(),
            format!("--kubeconfig={}", paths.admin_kubeconfig().display()),
            format!("--pod-manifest-path={}", paths.kubelet_manifests_dir.display()),
            format!(
                "--node-labels={}",
                util::map_to_key_value_pairs(&self.config.node.labels, ",")
            ),
            "--container-runtime-endpoint=npipe://./pipe/containerd-containerd".to_string(),
            "--v=2".to_string(),
        ]);

        let svc = crate::platform::ServiceConfig {
            name: "kubelet".into(),
            display_name: "Kubelet".into(),
            description: "Kubernetes node agent".into(),
            binary_path: paths.kubelet_binary().to_string_lossy().into_owned(),
            args,
            dependencies: vec!["containerd".into()],
            restart: Some(crate::platform::RestartPolicy::Always),
            ..Default::default()
        };
        if self.platform.service().exists("kubelet").await {
            let _ = self.platform.service().stop("kubelet").await;
            let _ = self.platform.service().uninstall("kubelet").await;
        }
        self.platform.service().install(&svc).await
    }

    #[cfg(target_os = "linux")]
    async fn configuration_valid(&self) -> bool {
        let defaults = match tokio::fs::read_to_string(DEFAULTS_PATH).await {
            Ok(content) => content,
            Err(_) => return false,
        };
        for marker in [
            "KUBELET_NODE_LABELS=",
            "KUBELET_CONFIG_FILE_FLAGS=",
            "KUBELET_FLAGS=",
            "--cgroup-driver=systemd",
            "--authorization-mode=Webhook",
        ] {
            if !defaults.contains(marker) {
                return false;
            }
        }
        let unit = match tokio::fs::read_to_string(SERVICE_PATH).await {
            Ok(content) => content,
            Err(_) => return false,
        };
        ["[Unit]", "Description=Kubelet", "WantedBy=multi-user.target"]
            .iter()
            .all(|marker| unit.contains(marker))
    }
}

#[async_trait]
impl Step for KubeletInstaller {
    fn name(&self) -> &str {
        "KubeletInstaller"
    }

    async fn is_completed(&self) -> bool {
        #[cfg(target_os = "linux")]
        {
            if !util::file_exists(std::path::Path::new(DEFAULTS_PATH))
                || !util::file_exists(std::path::Path::new(SERVICE_PATH))
            {
                return false;
            }
            if !self.configuration_valid().await {
                return false;
            }
            let service = self.platform.service();
            service.is_active("kubelet").await && service.is_enabled("kubelet").await
        }
        #[cfg(target_os = "windows")]
        self.platform.service().exists("kubelet").await
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        tracing::info!("configuring kubelet");
        self.ensure_cluster_credentials().await?;
        self.configure().await?;
        tracing::info!("kubelet configured");
        Ok(())
    }
}

pub struct KubeletUninstaller {
    platform: Arc<Platform>,
}

impl KubeletUninstaller {
    pub fn new(_config: Arc<Config>, platform: Arc<Platform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Step for KubeletUninstaller {
    fn name(&self) -> &str {
        "KubeletUninstaller"
    }

    async fn is_completed(&self) -> bool {
        #[cfg(target_os = "linux")]
        return !util::file_exists(std::path::Path::new(SERVICE_PATH))
            && !util::file_exists(std::path::Path::new(DEFAULTS_PATH));
        #[cfg(target_os = "windows")]
        !self.platform.service().exists("kubelet").await
    }

    async fn execute(&self) -> FlexnodeResult<()> {
        let paths = self.platform.paths();
        #[cfg(target_os = "linux")]
        {
            for file in [DEFAULTS_PATH, SERVICE_PATH, CONTAINERD_DROPIN] {
                util::remove_file_privileged(std::path::Path::new(file)).await?;
            }
            util::remove_dir_privileged(&paths.kubelet_dropin_dir).await?;
            self.platform.service().reload_daemon().await?;
        }
        #[cfg(target_os = "windows")]
        {
            if self.platform.service().exists("kubelet").await {
                let _ = self.platform.service().stop("kubelet").await;
                self.platform.service().uninstall("kubelet").await?;
            }
        }
        util::remove_file_privileged(&paths.admin_kubeconfig()).await?;
        util::remove_dir_privileged(&paths.kubelet_data_dir).await?;
        tracing::info!("kubelet configuration removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn installer() -> KubeletInstaller {
        let mut config = Config::default();
        config.containerd.pause_image = "mcr.microsoft.com/oss/kubernetes/pause:3.6".into();
        config.node.labels =
            BTreeMap::from([("kubernetes.azure.com/mode".to_string(), "user".to_string())]);
        KubeletInstaller::new(Arc::new(config), Arc::new(Platform::host()))
    }

    #[test]
    fn kubelet_flags_carry_resource_settings() {
        let flags = installer().kubelet_flags();
        assert!(flags.contains("--max-pods=110"));
        assert!(flags.contains("--eviction-hard=memory.available<750Mi"));
        assert!(flags.contains("--kube-reserved=cpu=100m,memory=1638Mi"));
        assert!(flags.contains("--pod-infra-container-image=mcr.microsoft.com/oss/kubernetes/pause:3.6"));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn defaults_file_includes_labels_and_kubeconfig() {
        let rendered = installer().render_defaults();
        assert!(rendered.contains("KUBELET_NODE_LABELS=\"kubernetes.azure.com/mode=user\""));
        assert!(rendered.contains("--kubeconfig=/etc/kubernetes/admin.conf"));
        assert!(rendered.contains("--cgroup-driver=systemd"));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn service_unit_references_environment_file() {
        let rendered = installer().render_service_unit();
        assert!(rendered.contains("EnvironmentFile=/etc/default/kubelet"));
        assert!(rendered.contains("ExecStart=/usr/local/bin/kubelet"));
        assert!(rendered.contains("WantedBy=multi-user.target"));
    }
}
