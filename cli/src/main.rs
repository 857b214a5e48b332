//! chartscan CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use chartscan_cli::commands::{dispatch, Cli};
use chartscan_core::Settings;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let settings = Settings::from_env();

    // HELM_DEBUG raises the default level; RUST_LOG still wins.
    let default_filter = if settings.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    if let Err(e) = dispatch(cli, settings).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
