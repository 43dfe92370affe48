//! `mmu` - market map updater
//!
//! Usage: mmu [--config F] <generate|override|upserts|generate-upserts> ...

use clap::Parser;
use tracing::info;

use market_map_updater::cli::Cli;
use market_map_updater::commands;
use market_map_updater::config::Settings;
use market_map_updater::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        settings.logging.level = level.clone();
    }
    init_logging(&settings.logging)?;

    info!(config = %settings, "starting market map updater");
    commands::run(&settings, &cli.command).await
}
