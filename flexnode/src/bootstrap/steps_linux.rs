//! Hand-ordered step lists for Linux nodes.
//!
//! The cleanup list is authored independently of the install list rather
//! than mechanically reversed: services stop first so nothing restarts
//! components mid-removal, and the Arc agent goes last because earlier
//! cleanup steps may still need its identity.

use super::Step;
use crate::components::{
    arc, cni, containerd, kube_binaries, kubelet, npd, runc, services, system_configuration,
};
use crate::config::Config;
use crate::platform::Platform;
use std::sync::Arc;

pub fn bootstrap_steps(config: &Arc<Config>, platform: &Arc<Platform>) -> Vec<Box<dyn Step>> {
    vec![
        // Arc first: later steps authenticate with the machine identity.
        Box::new(arc::ArcInstaller::new(config.clone(), platform.clone())),
        // Quiesce anything a previous run left running.
        Box::new(services::ServicesUninstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(system_configuration::SystemConfigurationInstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(runc::RuncInstaller::new(config.clone(), platform.clone())),
        Box::new(containerd::ContainerdInstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(kube_binaries::KubeBinariesInstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(cni::CniInstaller::new(config.clone(), platform.clone())),
        Box::new(kubelet::KubeletInstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(npd::NpdInstaller::new(config.clone(), platform.clone())),
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
        Box::new(npd::NpdUninstaller::new(config.clone(), platform.clone())),
        Box::new(kubelet::KubeletUninstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(cni::CniUninstaller::new(config.clone(), platform.clone())),
        Box::new(kube_binaries::KubeBinariesUninstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(containerd::ContainerdUninstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(runc::RuncUninstaller::new(config.clone(), platform.clone())),
        Box::new(system_configuration::SystemConfigurationUninstaller::new(
            config.clone(),
            platform.clone(),
        )),
        Box::new(arc::ArcUninstaller::new(config.clone(), platform.clone())),
    ]
}
