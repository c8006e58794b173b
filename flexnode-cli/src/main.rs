mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("flexnode={0},flexnode_cli={0}", default_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Cancel the token on Ctrl-C so the in-flight step stops at its next await
/// point instead of the process dying mid-mutation.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            cancel.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.debug);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    match cli.command {
        Commands::Bootstrap(args) => commands::bootstrap::execute(args, &cli.global, cancel).await,
        Commands::Unbootstrap(args) => {
            commands::unbootstrap::execute(args, &cli.global, cancel).await
        }
        Commands::Status(args) => commands::status::execute(args, &cli.global).await,
    }
}
