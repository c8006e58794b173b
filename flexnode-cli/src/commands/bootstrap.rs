use clap::Args;
use flexnode::{Bootstrapper, FlexnodeError, Platform};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct BootstrapArgs {}

pub async fn execute(
    _args: BootstrapArgs,
    global: &crate::cli::GlobalFlags,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let config = Arc::new(global.load_config()?);
    let platform = Arc::new(Platform::host());
    let bootstrapper = Bootstrapper::new(config, platform, cancel);

    match bootstrapper.bootstrap().await {
        Ok(result) => {
            super::print_summary(&result);
            println!("bootstrap completed");
            Ok(())
        }
        Err(FlexnodeError::BootstrapFailed(result)) => {
            super::print_summary(&result);
            anyhow::bail!(
                "bootstrap failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            )
        }
        Err(e) => Err(e.into()),
    }
}
