//! Merge a generated market map into the on-chain one
//!
//! Enabled on-chain markets are sticky: they are never removed and, unless
//! `update_enabled` is set, never modified. New markets always enter
//! disabled.

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::marketmap::MarketMap;
use crate::types::{Market, ProviderConfig};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Allow changes to markets that are already enabled
    pub update_enabled: bool,
    /// Replace provider lists instead of appending new providers
    pub overwrite_providers: bool,
    /// Drop generated markets that are not on chain
    pub existing_only: bool,
    /// List DeFi tickers separately instead of folding them into listed markets
    pub disable_defi_merging: bool,
}

/// Combine `generated` into `actual`, returning the combined map and the
/// sorted tickers to remove from chain
pub fn combine_market_maps(
    actual: &MarketMap,
    generated: &MarketMap,
    options: &Options,
    cross_launch_ids: &[String],
) -> Result<(MarketMap, Vec<String>)> {
    info!(
        actual = actual.len(),
        generated = generated.len(),
        ?options,
        "combining market maps"
    );

    let cross: BTreeSet<&str> = cross_launch_ids.iter().map(String::as_str).collect();
    let mut combined = MarketMap::new();
    let mut defi_candidates = Vec::new();

    for (ticker, market) in generated.iter() {
        let Some(actual_market) = actual.get(ticker) else {
            if options.existing_only {
                debug!(ticker = %ticker, "skipping market not in actual market map");
                continue;
            }
            if market.ticker.currency_pair.is_defi() && !options.disable_defi_merging {
                defi_candidates.push(market);
                continue;
            }
            debug!(ticker = %ticker, "adding generated market as disabled");
            let mut market = market.clone();
            market.ticker.enabled = false;
            combined.insert(market);
            continue;
        };

        if has_different_cmc_id(ticker, actual_market, market, &cross)? {
            combined.insert(actual_market.clone());
            continue;
        }

        if actual_market.is_enabled() && !options.update_enabled {
            debug!(ticker = %ticker, "keeping enabled market unchanged");
            combined.insert(actual_market.clone());
            continue;
        }

        debug!(ticker = %ticker, "updating market from generated");
        let mut merged = market.clone();
        merged.ticker.enabled = actual_market.ticker.enabled;
        merged.ticker.min_provider_count = actual_market.ticker.min_provider_count;
        merged.ticker.decimals = actual_market.ticker.decimals;
        if !options.overwrite_providers {
            merged.provider_configs = append_providers(&actual_market.provider_configs, &market.provider_configs);
        }
        combined.insert(merged);
    }

    for market in defi_candidates {
        merge_defi_market(actual, &mut combined, market, options.update_enabled)?;
    }

    let mut removals = Vec::new();
    for (ticker, market) in actual.iter() {
        if generated.contains(ticker) || combined.contains(ticker) {
            continue;
        }
        if market.is_enabled() {
            warn!(ticker = %ticker, "keeping enabled market missing from generated market map");
            combined.insert(market.clone());
        } else {
            debug!(ticker = %ticker, "removing disabled market missing from generated market map");
            removals.push(ticker.clone());
        }
    }

    info!(combined = combined.len(), removals = removals.len(), "combined market maps");
    Ok((combined, removals))
}

/// True when an enabled actual market refers to another CMC asset than the generated one
fn has_different_cmc_id(
    ticker: &str,
    actual: &Market,
    generated: &Market,
    cross: &BTreeSet<&str>,
) -> Result<bool> {
    if !actual.is_enabled() {
        return Ok(false);
    }

    let Some(actual_meta) = actual
        .ticker
        .metadata()
        .with_context(|| format!("invalid on-chain metadata for {ticker}"))?
    else {
        if !cross.contains(ticker) {
            warn!(ticker = %ticker, "empty ticker metadata for existing market");
        }
        return Ok(false);
    };

    let Some(generated_meta) = generated
        .ticker
        .metadata()
        .with_context(|| format!("invalid generated metadata for {ticker}"))?
    else {
        bail!("empty ticker metadata for market {ticker}");
    };

    let actual_id = actual_meta.primary_id();
    let generated_id = generated_meta.primary_id();
    if actual_id != generated_id {
        warn!(
            ticker = %ticker,
            generated_cmc_id = generated_id.unwrap_or_default(),
            actual_cmc_id = actual_id.unwrap_or_default(),
            "not updating market because the generated market has a different CMC ID"
        );
        return Ok(true);
    }
    Ok(false)
}

/// Actual providers followed by generated providers with new names
fn append_providers(actual: &[ProviderConfig], generated: &[ProviderConfig]) -> Vec<ProviderConfig> {
    let mut out = actual.to_vec();
    for pc in generated {
        if !out.iter().any(|existing| existing.name == pc.name) {
            out.push(pc.clone());
        }
    }
    out
}

/// Fold a new DeFi market into an enabled listed market for the same asset,
/// or add it disabled when none exists. Enabled markets only change when
/// `update_enabled` is set.
fn merge_defi_market(
    actual: &MarketMap,
    combined: &mut MarketMap,
    market: &Market,
    update_enabled: bool,
) -> Result<()> {
    let ticker = market.key();
    let defi_id = market
        .ticker
        .metadata()
        .with_context(|| format!("invalid generated metadata for {ticker}"))?
        .and_then(|m| m.primary_id().map(str::to_string));

    let target = defi_id.as_deref().filter(|_| update_enabled).and_then(|id| {
        actual
            .iter()
            .map(|(_, m)| m)
            .filter(|m| m.is_enabled() && !m.ticker.currency_pair.is_defi())
            .filter(|m| m.ticker.currency_pair.quote == market.ticker.currency_pair.quote)
            .find(|m| {
                m.ticker
                    .metadata()
                    .ok()
                    .flatten()
                    .and_then(|meta| meta.primary_id().map(|p| p == id))
                    .unwrap_or(false)
            })
            .map(Market::key)
    });

    if let Some(listed) = target.as_deref().and_then(|key| actual.get(key)) {
        if !combined.contains(&listed.key()) {
            combined.insert(listed.clone());
        }
    }

    let listed = match &target {
        Some(key) => combined.get_mut(key),
        None => None,
    };
    match listed {
        Some(listed) => {
            info!(defi = %ticker, into = %listed.key(), "merging DeFi market into listed market");
            listed.provider_configs = append_providers(&listed.provider_configs, &market.provider_configs);
        }
        None => {
            let mut market = market.clone();
            market.ticker.enabled = false;
            combined.insert(market);
        }
    }
    Ok(())
}
