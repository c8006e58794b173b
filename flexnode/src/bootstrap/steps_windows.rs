//! Hand-ordered step lists for Windows nodes.

use super::Step;
use crate::components::{
    arc, cni, containerd, kube_binaries, kubelet, runhcs, services, system_configuration,
};
use crate::config::Config;
use crate::platform::Platform;
use std::sync::Arc;

pub fn bootstrap_steps(config: &Arc<Config>, platform: &Arc<Platform>) -> Vec<Box<dyn Step>> {
    vec![
        Box::new(system_configuration::SystemConfigurationInstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(containerd::ContainerdInstaller::new(
            config.clone(),
            platform.clone(),
        )),
        // runhcs ships inside the containerd archive; verify it landed.
        Box::new(runhcs::RunhcsInstaller::new(config.clone(), platform.clone())),
        Box::new(kube_binaries::KubeBinariesInstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(cni::CniInstaller::new(config.clone(), platform.clone())),
        Box::new(kubelet::KubeletInstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(arc::ArcInstaller::new(config.clone(), platform.clone())),
        Box::new(services::ServicesInstaller::new(
            config.clone(),
            platform.clone(),
        )),
    ]
}

pub fn unbootstrap_steps(config: &Arc<Config>, platform: &Arc<Platform>) -> Vec<Box<dyn Step>> {
    vec![
        Box::new(services::ServicesUninstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(arc::ArcUninstaller::new(config.clone(), platform.clone())),
        Box::new(kubelet::KubeletUninstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(cni::CniUninstaller::new(config.clone(), platform.clone())),
        Box::new(kube_binaries::KubeBinariesUninstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(runhcs::RunhcsUninstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(containerd::ContainerdUninstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(system_configuration::SystemConfigurationUninstaller::new(
            config.clone(),
            platform.clone(),
        )),
    ]
}
