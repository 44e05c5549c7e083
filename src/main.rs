//! Command-line entrypoint for ingesting, syncing, reconciling, and
//! inspecting the donation ledger.

use clap::Parser;

use donation_ledger::cli::{self, Cli};
use donation_ledger::setup_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.env.into_config();
    setup_tracing(&config.log_level);

    cli::run(config, cli.command).await?;
    Ok(())
}
