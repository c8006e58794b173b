use clap::Args;
use flexnode::{Bootstrapper, Platform};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct UnbootstrapArgs {}

pub async fn execute(
    _args: UnbootstrapArgs,
    global: &crate::cli::GlobalFlags,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let config = Arc::new(global.load_config()?);
    let platform = Arc::new(Platform::host());
    let bootstrapper = Bootstrapper::new(config, platform, cancel);

    // Cleanup is best effort: individual step failures are reported in the
    // summary but never fail the command.
    let result = bootstrapper.unbootstrap().await?;
    super::print_summary(&result);
    if result.success {
        println!("unbootstrap completed");
    } else {
        println!("unbootstrap completed with failures, see summary above");
    }
    Ok(())
}
