//! Subcommand handlers: load inputs, run a stage, write its artifacts.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::cli::{Command, GenerateArgs, GenerateUpsertsArgs, MergeFlags, OverrideArgs, SourceArgs, UpsertsArgs};
use crate::client::{FileMarketMapSource, MarketMapSource, RestMarketMapSource};
use crate::config::Settings;
use crate::generator::feed::ExclusionReasons;
use crate::generator::transformer::AssetInfos;
use crate::generator::Generator;
use crate::marketmap::{MarketMap, ValidationMode};
use crate::merge::combine_market_maps;
use crate::persistence::{self, ArtifactDir};
use crate::sniff::{ScamScreener, TokenSniffer};
use crate::store::{JsonProviderStore, ProviderStore};
use crate::upsert::{generate_upserts, Upserts};

pub async fn run(settings: &Settings, command: &Command) -> Result<()> {
    let artifacts = ArtifactDir::default();
    match command {
        Command::Generate(args) => generate(settings, &artifacts, args).await,
        Command::Override(args) => override_market_map(settings, &artifacts, args).await,
        Command::Upserts(args) => upserts(settings, &artifacts, args).await,
        Command::GenerateUpserts(args) => generate_and_upsert(settings, &artifacts, args).await,
    }
}

/// On-chain market map from a file, the given API, or `chain.api_url`; empty when none is set
async fn load_on_chain(settings: &Settings, source: &SourceArgs) -> Result<MarketMap> {
    if let Some(path) = &source.market_map {
        return FileMarketMapSource::new(path).market_map().await;
    }
    let api = source
        .chain_api
        .clone()
        .unwrap_or_else(|| settings.chain.api_url.clone());
    if api.is_empty() {
        info!("no on-chain market map source configured, using an empty market map");
        return Ok(MarketMap::new());
    }
    RestMarketMapSource::new(&api)?.market_map().await
}

fn screener(settings: &Settings) -> Result<Option<Arc<dyn ScamScreener>>> {
    if !settings.sniff.enabled {
        return Ok(None);
    }
    Ok(Some(Arc::new(TokenSniffer::new(&settings.sniff)?)))
}

fn validation_mode(warn_on_invalid: bool) -> ValidationMode {
    if warn_on_invalid {
        ValidationMode::ValidSubset
    } else {
        ValidationMode::Strict
    }
}

fn read_cross_launch_list(flags: &MergeFlags) -> Result<Vec<String>> {
    match &flags.cross_launch_list {
        Some(path) => persistence::read_json(path).context("failed to read cross launch list"),
        None => Ok(Vec::new()),
    }
}

async fn run_generate(
    settings: &Settings,
    provider_data: &Path,
    on_chain: &MarketMap,
) -> Result<(MarketMap, ExclusionReasons, AssetInfos)> {
    let store = Arc::new(JsonProviderStore::from_path(provider_data).await?);
    let infos = store.asset_infos().await?;

    let mut generator = Generator::new(store);
    if let Some(screener) = screener(settings)? {
        generator = generator.with_screener(screener);
    }
    let (mm, exclusions) = generator
        .generate_market_map(&settings.generate, &settings.sniff, on_chain)
        .await
        .context("failed to generate market map")?;
    Ok((mm, exclusions, infos))
}

async fn run_upserts(
    settings: &Settings,
    current: MarketMap,
    generated: MarketMap,
    infos: &AssetInfos,
    warn_on_invalid: bool,
) -> Result<Upserts> {
    let mode = validation_mode(warn_on_invalid);
    let current = current.checked(mode, "on-chain")?;
    let generated = generated.checked(mode, "generated")?;
    let screener = screener(settings)?;

    generate_upserts(&current, &generated, &settings.upsert, infos, screener.as_deref()).await
}

async fn generate(settings: &Settings, artifacts: &ArtifactDir, args: &GenerateArgs) -> Result<()> {
    let on_chain = load_on_chain(settings, &args.source).await?;
    let (mm, exclusions, _) = run_generate(settings, &args.provider_data, &on_chain).await?;

    persistence::write_json(artifacts.resolve(args.output.as_deref(), persistence::GENERATED_MARKET_MAP), &mm)?;
    persistence::write_json(
        artifacts.resolve(args.exclusions.as_deref(), persistence::GENERATED_EXCLUSIONS),
        &exclusions,
    )?;
    Ok(())
}

async fn override_market_map(settings: &Settings, artifacts: &ArtifactDir, args: &OverrideArgs) -> Result<()> {
    let actual = load_on_chain(settings, &args.source).await?;
    let generated = FileMarketMapSource::new(&args.generated).market_map().await?;
    let cross = read_cross_launch_list(&args.merge)?;

    let (combined, removals) = combine_market_maps(&actual, &generated, &args.merge.options(), &cross)?;

    persistence::write_json(artifacts.resolve(args.output.as_deref(), persistence::OVERRIDE_MARKET_MAP), &combined)?;
    persistence::write_json(artifacts.resolve(args.removals.as_deref(), persistence::MARKET_MAP_REMOVALS), &removals)?;
    Ok(())
}

async fn upserts(settings: &Settings, artifacts: &ArtifactDir, args: &UpsertsArgs) -> Result<()> {
    let current = load_on_chain(settings, &args.source).await?;
    let generated = FileMarketMapSource::new(&args.generated).market_map().await?;
    let infos = match &args.provider_data {
        Some(path) => JsonProviderStore::from_path(path).await?.asset_infos().await?,
        None => AssetInfos::new(),
    };

    let upserts = run_upserts(settings, current, generated, &infos, args.warn_on_invalid_market_map).await?;

    persistence::write_json(artifacts.resolve(args.updates.as_deref(), persistence::MARKET_MAP_UPDATES), &upserts.updates)?;
    persistence::write_json(
        artifacts.resolve(args.additions.as_deref(), persistence::MARKET_MAP_ADDITIONS),
        &upserts.additions,
    )?;
    Ok(())
}

async fn generate_and_upsert(
    settings: &Settings,
    artifacts: &ArtifactDir,
    args: &GenerateUpsertsArgs,
) -> Result<()> {
    let on_chain = load_on_chain(settings, &args.source).await?;

    let (generated, exclusions, infos) = run_generate(settings, &args.provider_data, &on_chain).await?;
    let cross = read_cross_launch_list(&args.merge)?;
    let (combined, removals) = combine_market_maps(&on_chain, &generated, &args.merge.options(), &cross)?;

    if args.write_intermediate {
        persistence::write_json(artifacts.path(persistence::GENERATED_MARKET_MAP), &generated)?;
        persistence::write_json(artifacts.path(persistence::GENERATED_EXCLUSIONS), &exclusions)?;
        persistence::write_json(artifacts.path(persistence::OVERRIDE_MARKET_MAP), &combined)?;
        persistence::write_json(artifacts.path(persistence::MARKET_MAP_REMOVALS), &removals)?;
    }

    let upserts = run_upserts(settings, on_chain, combined, &infos, args.warn_on_invalid_market_map).await?;

    persistence::write_json(artifacts.resolve(args.updates.as_deref(), persistence::MARKET_MAP_UPDATES), &upserts.updates)?;
    persistence::write_json(
        artifacts.resolve(args.additions.as_deref(), persistence::MARKET_MAP_ADDITIONS),
        &upserts.additions,
    )?;
    info!(
        updates = upserts.updates.len(),
        additions = upserts.additions.len(),
        removals = removals.len(),
        "generate-upserts complete"
    );
    Ok(())
}
