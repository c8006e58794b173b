use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "flexnode",
    about = "Bootstrap a VM into an AKS worker node via Azure Arc",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalFlags {
    /// Path to the JSON configuration file
    #[arg(
        long,
        short = 'c',
        global = true,
        env = "FLEXNODE_CONFIG",
        default_value = "flexnode.json"
    )]
    pub config: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

impl GlobalFlags {
    pub fn load_config(&self) -> anyhow::Result<flexnode::Config> {
        flexnode::Config::load(&self.config)
            .map_err(|e| anyhow::anyhow!("{} ({})", e, self.config.display()))
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision this machine as an AKS worker node
    Bootstrap(crate::commands::bootstrap::BootstrapArgs),

    /// Remove everything bootstrap installed (best effort)
    Unbootstrap(crate::commands::unbootstrap::UnbootstrapArgs),

    /// Report the node's provisioning status
    Status(crate::commands::status::StatusArgs),
}
