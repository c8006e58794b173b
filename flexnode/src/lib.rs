//! flexnode: turns an Arc-connected machine into an AKS worker node.
//!
//! The library is organized around a sequential step orchestrator
//! ([`bootstrap::StepRunner`]) driving idempotent installer/uninstaller steps
//! ([`components`]) against OS facilities abstracted by [`platform`].

pub mod auth;
pub mod bootstrap;
pub mod components;
pub mod config;
pub mod errors;
pub mod platform;
pub mod status;
pub mod util;

pub use bootstrap::{Bootstrapper, ExecutionMode, ExecutionResult, Step, StepResult};
pub use config::Config;
pub use errors::{FlexnodeError, FlexnodeResult};
pub use platform::Platform;
