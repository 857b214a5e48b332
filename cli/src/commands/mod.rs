//! CLI definition and dispatch.

mod scan;

pub use scan::{Scan, ScanPlan};

use clap::Parser;
use chartscan_core::Settings;
use tokio_util::sync::CancellationToken;

/// Installs the stable/mysql chart into the mysql-test namespace, then pulls
/// every image its manifest references and reports their layer sizes.
#[derive(Parser, Debug)]
#[command(name = "chartscan", version)]
pub struct Cli {}

/// Run the scan with settings taken from the environment.
pub async fn dispatch(_cli: Cli, settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let plan = ScanPlan::default();
    let settings = settings.with_namespace(plan.namespace.clone());
    let scan = Scan::from_settings(&settings)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    scan.run(&plan, &mut stdout, &cancel).await?;
    Ok(())
}
