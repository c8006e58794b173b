//! Installer and uninstaller steps for every node component.
//!
//! Each module holds a `*Installer` / `*Uninstaller` pair implementing
//! [`crate::bootstrap::Step`]. Steps receive their `Arc<Config>` and
//! `Arc<Platform>` at construction; nothing here touches global state.

pub mod arc;
pub mod cluster_credentials;
pub mod cni;
pub mod containerd;
pub mod kube_binaries;
pub mod kubelet;
pub mod services;
pub mod system_configuration;

#[cfg(target_os = "linux")]
pub mod npd;

#[cfg(target_os = "linux")]
pub mod runc;

#[cfg(target_os = "windows")]
pub mod runhcs;
