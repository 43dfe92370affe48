//! Command-line definitions for the `mmu` binary.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `generate` | Build a market map from provider data |
//! | `override` | Merge a generated map into the on-chain map |
//! | `upserts` | Diff the merged map against the on-chain map |
//! | `generate-upserts` | Run all three stages in sequence |
//!
//! Artifacts default to `./tmp/`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::merge::Options;

#[derive(Debug, Parser)]
#[command(
    name = "mmu",
    author,
    version,
    about = "Generates, merges and diffs oracle market maps"
)]
pub struct Cli {
    /// Config file layered over config/default and config/local.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level, overrides logging.level from config.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build a market map from provider data
    Generate(GenerateArgs),
    /// Merge a generated market map into the on-chain one
    Override(OverrideArgs),
    /// Compute updates and additions against the on-chain market map
    Upserts(UpsertsArgs),
    /// Run generate, override and upserts in sequence
    GenerateUpserts(GenerateUpsertsArgs),
}

/// Where the on-chain market map comes from.
#[derive(Debug, Clone, Default, Args)]
pub struct SourceArgs {
    /// On-chain market map JSON file.
    #[arg(long, conflicts_with = "chain_api")]
    pub market_map: Option<PathBuf>,

    /// Chain REST API to query instead of a file; falls back to chain.api_url.
    #[arg(long)]
    pub chain_api: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct GenerateArgs {
    /// Provider data document with asset_infos and provider_markets.
    #[arg(long)]
    pub provider_data: PathBuf,

    #[command(flatten)]
    pub source: SourceArgs,

    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub exclusions: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct MergeFlags {
    /// Allow changes to markets already enabled on chain.
    #[arg(long)]
    pub update_enabled: bool,

    /// Replace provider lists instead of appending.
    #[arg(long)]
    pub overwrite_providers: bool,

    /// Only touch markets that already exist on chain.
    #[arg(long)]
    pub existing_only: bool,

    #[arg(long)]
    pub disable_defi_market_merging: bool,

    /// JSON array of cross-launched tickers.
    #[arg(long)]
    pub cross_launch_list: Option<PathBuf>,
}

impl MergeFlags {
    pub fn options(&self) -> Options {
        Options {
            update_enabled: self.update_enabled,
            overwrite_providers: self.overwrite_providers,
            existing_only: self.existing_only,
            disable_defi_merging: self.disable_defi_market_merging,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct OverrideArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Generated market map to merge.
    #[arg(long)]
    pub generated: PathBuf,

    #[command(flatten)]
    pub merge: MergeFlags,

    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub removals: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct UpsertsArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Merged market map to diff against the on-chain one.
    #[arg(long)]
    pub generated: PathBuf,

    /// Provider data used to look up contract addresses for scam screening.
    #[arg(long)]
    pub provider_data: Option<PathBuf>,

    /// Continue with the valid subset of invalid input maps.
    #[arg(long)]
    pub warn_on_invalid_market_map: bool,

    #[arg(long)]
    pub updates: Option<PathBuf>,

    #[arg(long)]
    pub additions: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct GenerateUpsertsArgs {
    #[arg(long)]
    pub provider_data: PathBuf,

    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub merge: MergeFlags,

    #[arg(long)]
    pub warn_on_invalid_market_map: bool,

    /// Also write the generated map, exclusions, merged map and removals.
    #[arg(long)]
    pub write_intermediate: bool,

    #[arg(long)]
    pub updates: Option<PathBuf>,

    #[arg(long)]
    pub additions: Option<PathBuf>,
}
