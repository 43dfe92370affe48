//! Feed transforms
//!
//! Each transform consumes the surviving feeds and returns the new set plus
//! an exclusion reason for every feed it dropped. Transforms that admit
//! already-listed markets more leniently also read the on-chain market map.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::GenerateConfig;
use crate::error::MmuError;
use crate::generator::feed::{average_prices, sort_feeds, ExclusionReasons, Feed};
use crate::marketmap::MarketMap;

/// Stand-in for "no on-chain CMC id"
const NON_EXISTENT_CMC_ID: i64 = -1;

/// Invert feeds whose base is a target quote; drop feeds matching no target quote
pub fn invert_or_drop(
    cfg: &GenerateConfig,
    feeds: Vec<Feed>,
    _on_chain: &MarketMap,
) -> Result<(Vec<Feed>, ExclusionReasons)> {
    info!(feeds = feeds.len(), "inverting feeds");

    let quotes: Vec<&String> = cfg.quotes.keys().collect();
    let mut out = Vec::with_capacity(feeds.len());
    let mut exclusions = ExclusionReasons::new();

    for mut feed in feeds {
        if cfg.is_target_quote(&feed.pair.quote) {
            out.push(feed);
            continue;
        }

        if cfg.is_target_quote(&feed.pair.base) {
            debug!(ticker = %feed.pair, provider = %feed.provider(), "inverting feed");
            feed.pair = feed.pair.invert();
            feed.provider_config.invert = true;
            if !feed.reference_price.is_zero() {
                feed.reference_price = Decimal::ONE / feed.reference_price;
            }
            feed.cmc = feed.cmc.invert();
            out.push(feed);
            continue;
        }

        exclusions.add_feed(
            &feed,
            format!(
                "Transform InvertOrDrop: {}, feed cannot be inverted to quotes: {:?}",
                feed.pair, quotes
            ),
        );
        debug!(ticker = %feed.pair, provider = %feed.provider(), "dropping feed");
    }

    info!(remaining = out.len(), "inverted feeds");
    Ok((out, exclusions))
}

/// Threshold for a feed; relaxed when its base is already live as BASE/USD
fn min_threshold(cfg: &GenerateConfig, feed: &Feed, threshold: f64, on_chain: &MarketMap) -> f64 {
    let on_chain_ticker = feed.pair.base_usd().to_string();
    if on_chain.is_enabled(&on_chain_ticker) {
        let relaxed = threshold * cfg.relaxed_min_volume_and_liquidity_factor;
        debug!(
            ticker = %on_chain_ticker,
            threshold,
            relaxed,
            "using relaxed threshold for market already enabled on chain"
        );
        return relaxed;
    }
    threshold
}

/// Drop feeds whose depth is below the quote's minimum liquidity
pub fn prune_by_liquidity(
    cfg: &GenerateConfig,
    feeds: Vec<Feed>,
    on_chain: &MarketMap,
) -> Result<(Vec<Feed>, ExclusionReasons)> {
    info!(feeds = feeds.len(), "pruning by liquidity");

    let mut out = Vec::with_capacity(feeds.len());
    let mut exclusions = ExclusionReasons::new();

    for feed in feeds {
        if cfg.provider(feed.provider()).map(|p| p.ignore_liquidity).unwrap_or(false) {
            out.push(feed);
            continue;
        }

        let Some(quote_cfg) = cfg.quotes.get(&feed.pair.quote) else {
            exclusions.add_feed(&feed, "PruneByLiquidity: Not Found");
            continue;
        };
        let min = min_threshold(cfg, &feed, quote_cfg.min_provider_liquidity, on_chain);

        match feed.liquidity {
            Some(liq) if liq.is_sufficient(min) => out.push(feed),
            Some(liq) => {
                exclusions.add_feed(
                    &feed,
                    format!(
                        "PruneByLiquidity: NegativeDepthTwo: {:.6}, PositiveDepthTwo: {:.6}, MinProviderLiquidity: {:.6}",
                        liq.negative_depth_two, liq.positive_depth_two, min
                    ),
                );
            }
            None => exclusions.add_feed(&feed, "PruneByLiquidity: Not Found"),
        }
    }

    info!(remaining = out.len(), "pruned feeds by liquidity");
    Ok((out, exclusions))
}

/// Drop feeds whose 24h quote volume is below the quote's minimum
pub fn prune_by_quote_volume(
    cfg: &GenerateConfig,
    feeds: Vec<Feed>,
    on_chain: &MarketMap,
) -> Result<(Vec<Feed>, ExclusionReasons)> {
    info!(feeds = feeds.len(), "pruning by quote volume");

    let mut out = Vec::with_capacity(feeds.len());
    let mut exclusions = ExclusionReasons::new();

    for feed in feeds {
        if cfg.provider(feed.provider()).map(|p| p.ignore_volume).unwrap_or(false) {
            out.push(feed);
            continue;
        }

        let Some(quote_cfg) = cfg.quotes.get(&feed.pair.quote) else {
            exclusions.add_feed(&feed, "PruneByQuote: Not Found");
            continue;
        };
        let min = min_threshold(cfg, &feed, quote_cfg.min_provider_volume, on_chain);

        if feed.daily_quote_volume >= min {
            out.push(feed);
        } else {
            let reason = format!(
                "PruneByQuote: DailyQuoteVolume: {:.6}, MinProviderVolume: {:.6}",
                feed.daily_quote_volume, min
            );
            exclusions.add_feed(&feed, reason);
        }
    }

    info!(remaining = out.len(), "pruned feeds by quote volume");
    Ok((out, exclusions))
}

/// Drop feeds whose depth is below the provider's minimum liquidity
pub fn prune_by_provider_liquidity(
    cfg: &GenerateConfig,
    feeds: Vec<Feed>,
    on_chain: &MarketMap,
) -> Result<(Vec<Feed>, ExclusionReasons)> {
    info!(feeds = feeds.len(), "pruning by provider liquidity");

    let mut out = Vec::with_capacity(feeds.len());
    let mut exclusions = ExclusionReasons::new();

    for feed in feeds {
        let Some(provider) = cfg.provider(feed.provider()) else {
            exclusions.add_feed(&feed, "PruneByProviderLiquidity: provider not found");
            continue;
        };
        if provider.ignore_liquidity {
            out.push(feed);
            continue;
        }

        let min = min_threshold(cfg, &feed, provider.min_provider_liquidity, on_chain);
        match feed.liquidity {
            Some(liq) if liq.is_sufficient(min) => out.push(feed),
            Some(liq) => {
                exclusions.add_feed(
                    &feed,
                    format!(
                        "PruneByProviderLiquidity: NegativeDepthTwo: {:.6}, PositiveDepthTwo: {:.6}, MinProviderLiquidity: {:.6}",
                        liq.negative_depth_two, liq.positive_depth_two, min
                    ),
                );
            }
            None => exclusions.add_feed(&feed, "PruneByProviderLiquidity: Not Found"),
        }
    }

    info!(remaining = out.len(), "pruned feeds by provider liquidity");
    Ok((out, exclusions))
}

/// Drop feeds whose 24h USD volume is below the provider's minimum
pub fn prune_by_provider_usd_volume(
    cfg: &GenerateConfig,
    feeds: Vec<Feed>,
    on_chain: &MarketMap,
) -> Result<(Vec<Feed>, ExclusionReasons)> {
    info!(feeds = feeds.len(), "pruning by provider volume");

    let mut out = Vec::with_capacity(feeds.len());
    let mut exclusions = ExclusionReasons::new();

    for feed in feeds {
        let Some(provider) = cfg.provider(feed.provider()) else {
            exclusions.add_feed(&feed, "PruneByProviderUsdVolume: Not Found");
            continue;
        };
        if provider.ignore_volume {
            out.push(feed);
            continue;
        }

        let min = min_threshold(cfg, &feed, provider.min_provider_volume, on_chain);
        if feed.daily_usd_volume >= min {
            out.push(feed);
        } else {
            let reason = format!(
                "PruneByProviderUsdVolume: Volume24H: {:.6}, MinProviderVolume: {:.6}",
                feed.daily_usd_volume, min
            );
            exclusions.add_feed(&feed, reason);
        }
    }

    info!(remaining = out.len(), "pruned feeds by provider volume");
    Ok((out, exclusions))
}

/// CMC id of the base asset if BASE/USD is enabled on chain with metadata
fn on_chain_base_asset_id(ticker: &Feed, on_chain: &MarketMap) -> Result<i64> {
    let on_chain_ticker = ticker.pair.base_usd().to_string();
    let Some(market) = on_chain.get(&on_chain_ticker) else {
        return Ok(NON_EXISTENT_CMC_ID);
    };
    if !market.is_enabled() {
        return Ok(NON_EXISTENT_CMC_ID);
    }

    let metadata = market
        .ticker
        .metadata()
        .with_context(|| format!("decoding on-chain metadata for {on_chain_ticker}"))?;
    match metadata.as_ref().and_then(|m| m.primary_id()) {
        Some(id) => id
            .parse::<i64>()
            .with_context(|| format!("failed to parse CMC ID {id:?} for {on_chain_ticker}")),
        None => {
            warn!(ticker = %on_chain_ticker, "empty ticker metadata for existing market");
            Ok(NON_EXISTENT_CMC_ID)
        }
    }
}

/// Keep one group of same-symbol feeds per ticker, picked by on-chain id then CMC rank
pub fn resolve_naming_aliases(
    _cfg: &GenerateConfig,
    feeds: Vec<Feed>,
    on_chain: &MarketMap,
) -> Result<(Vec<Feed>, ExclusionReasons)> {
    info!(feeds = feeds.len(), "resolving ticker naming aliases");

    // ticker -> unique id -> feeds
    let mut groups: BTreeMap<String, BTreeMap<String, Vec<Feed>>> = BTreeMap::new();
    for feed in feeds {
        groups
            .entry(feed.ticker_string())
            .or_default()
            .entry(feed.cmc.unique_id())
            .or_default()
            .push(feed);
    }

    let mut out = Vec::new();
    let mut exclusions = ExclusionReasons::new();

    for (ticker, ticker_groups) in groups {
        let Some(representative) = ticker_groups.values().next().and_then(|g| g.first()) else {
            continue;
        };
        let on_chain_id = on_chain_base_asset_id(representative, on_chain)?;

        // (base rank, quote rank, group id)
        let mut best: Option<(i64, i64, &String)> = None;
        for (group_id, group) in &ticker_groups {
            let Some(feed) = group.first() else {
                continue;
            };
            if !feed.cmc.has_rank() {
                continue;
            }
            if on_chain_id != NON_EXISTENT_CMC_ID && feed.cmc.base_id != on_chain_id {
                continue;
            }
            let candidate = (feed.cmc.base_rank, feed.cmc.quote_rank, group_id);
            if best.map(|b| (candidate.0, candidate.1) < (b.0, b.1)).unwrap_or(true) {
                best = Some(candidate);
            }
        }

        let Some((_, _, best_id)) = best else {
            warn!(ticker = %ticker, on_chain_id, "no valid naming alias group found for ticker");
            for feed in ticker_groups.values().flatten() {
                exclusions.add_feed(
                    feed,
                    format!("excluding due to naming alias for ticker {ticker}, no ranked CMC pair matches"),
                );
            }
            continue;
        };
        let best_id = best_id.clone();

        for (group_id, group) in ticker_groups {
            if group_id == best_id {
                out.extend(group);
                continue;
            }
            for feed in &group {
                exclusions.add_feed(
                    feed,
                    format!(
                        "excluding due to naming alias for ticker {ticker}, pair {group_id}, CMC pair {best_id} chosen instead"
                    ),
                );
            }
        }
    }

    sort_feeds(&mut out);
    info!(remaining = out.len(), "resolved ticker naming aliases");
    Ok((out, exclusions))
}

/// Rewrite feeds quoted in a normalizing quote into the target quote
pub fn normalize_by(
    cfg: &GenerateConfig,
    feeds: Vec<Feed>,
    _on_chain: &MarketMap,
) -> Result<(Vec<Feed>, ExclusionReasons)> {
    info!(feeds = feeds.len(), "adding normalize by pairs");

    let averages = average_prices(&feeds);
    let mut out = Vec::with_capacity(feeds.len());

    for mut feed in feeds {
        if !cfg.quotes.contains_key(&feed.pair.quote) {
            return Err(MmuError::config(format!(
                "quote {} not found in config for normalizing pair",
                feed.pair.quote
            ))
            .into());
        }

        if let Some(norm) = cfg.normalize_pair_for(&feed.pair.quote)? {
            let adjust = averages.get(&norm.to_string()).ok_or_else(|| {
                MmuError::config(format!("adjust price for {norm} not found"))
            })?;
            debug!(ticker = %feed.pair, normalize_by = %norm, "normalizing feed");

            // BTC/USDT * USDT/USD = BTC/USD
            feed.reference_price *= *adjust;
            feed.pair.quote = norm.quote.clone();
            feed.provider_config.normalize_by_pair = Some(norm);
        }

        out.push(feed);
    }

    info!(remaining = out.len(), "added normalize by pairs");
    Ok((out, ExclusionReasons::new()))
}

/// Drop feeds without a CMC id from providers that require one
pub fn drop_feeds_without_aggregator_ids(
    cfg: &GenerateConfig,
    feeds: Vec<Feed>,
    _on_chain: &MarketMap,
) -> Result<(Vec<Feed>, ExclusionReasons)> {
    info!(feeds = feeds.len(), "dropping feeds without aggregator ids");

    let mut out = Vec::with_capacity(feeds.len());
    let mut exclusions = ExclusionReasons::new();
    for feed in feeds {
        let required = cfg
            .provider(feed.provider())
            .map(|p| p.require_aggregate_ids)
            .unwrap_or(false);
        if !required || feed.cmc.base_id != 0 {
            out.push(feed);
            continue;
        }
        exclusions.add_feed(
            &feed,
            format!(
                "Transform DropFeedsWithoutAggregatorIDs: BaseCMCID: {}, RequireAggregateIDs: {}",
                feed.cmc.base_id, required
            ),
        );
    }

    info!(remaining = out.len(), "dropped feeds without aggregator ids");
    Ok((out, exclusions))
}

/// Keep the feeds matching the best-ranked base id of one ticker's sorted feeds
pub fn resolve_cmc_conflicts_sorted(
    ticker: &str,
    feeds: Vec<Feed>,
    exclusions: &mut ExclusionReasons,
) -> Result<Vec<Feed>> {
    let Some(best) = feeds.first().map(|f| f.cmc) else {
        return Ok(feeds);
    };

    let mut out = Vec::with_capacity(feeds.len());
    for feed in feeds {
        if feed.cmc.effective_base_rank() < best.effective_base_rank() {
            return Err(MmuError::invariant(format!(
                "found feed for {} with lower CMC rank than the best one for ticker {ticker}. best CMC rank {}, feed CMC rank {}",
                feed.provider(),
                best.base_rank,
                feed.cmc.base_rank
            ))
            .into());
        }
        if feed.cmc.base_id == best.base_id {
            out.push(feed);
        } else {
            exclusions.add_feed(
                &feed,
                format!(
                    "Transform ResolveCMCConflictsForMarket: BestCMCID: {}, FeedCMCID: {}, BestCMCRank: {}, FeedCMCRank: {}",
                    best.base_id, feed.cmc.base_id, best.base_rank, feed.cmc.base_rank
                ),
            );
        }
    }
    Ok(out)
}

/// Drop feeds of a ticker that refer to a different base asset than the best-ranked one
pub fn resolve_cmc_conflicts_for_market(
    _cfg: &GenerateConfig,
    feeds: Vec<Feed>,
    _on_chain: &MarketMap,
) -> Result<(Vec<Feed>, ExclusionReasons)> {
    info!(feeds = feeds.len(), "resolving CMC conflicts");

    let mut by_ticker: BTreeMap<String, Vec<Feed>> = BTreeMap::new();
    for feed in feeds {
        by_ticker.entry(feed.ticker_string()).or_default().push(feed);
    }

    let mut out = Vec::new();
    let mut exclusions = ExclusionReasons::new();
    for (ticker, mut ticker_feeds) in by_ticker {
        sort_feeds(&mut ticker_feeds);
        out.extend(resolve_cmc_conflicts_sorted(&ticker, ticker_feeds, &mut exclusions)?);
    }

    info!(remaining = out.len(), "resolved CMC conflicts");
    Ok((out, exclusions))
}

/// One feed per (provider, ticker): keep the more liquid, then higher-volume one
pub fn resolve_conflicts_for_provider(
    _cfg: &GenerateConfig,
    feeds: Vec<Feed>,
    _on_chain: &MarketMap,
) -> Result<(Vec<Feed>, ExclusionReasons)> {
    info!(feeds = feeds.len(), "resolving provider conflicts");

    let mut kept: BTreeMap<String, Feed> = BTreeMap::new();
    let mut exclusions = ExclusionReasons::new();

    for feed in feeds {
        let key = feed.provider_ticker();
        match kept.get(&key) {
            None => {
                kept.insert(key, feed);
            }
            Some(incumbent) if feed.is_better_than(incumbent) => {
                exclusions.add_feed(
                    incumbent,
                    format!(
                        "ResolveConflictsForProvider: replaced by {} with more liquidity or volume",
                        feed.provider_config.off_chain_ticker
                    ),
                );
                kept.insert(key, feed);
            }
            Some(incumbent) => {
                let reason = format!(
                    "ResolveConflictsForProvider: {} kept with more liquidity or volume",
                    incumbent.provider_config.off_chain_ticker
                );
                exclusions.add_feed(&feed, reason);
            }
        }
    }

    let mut out: Vec<Feed> = kept.into_values().collect();
    sort_feeds(&mut out);
    info!(remaining = out.len(), "resolved provider conflicts");
    Ok((out, exclusions))
}

/// Keep only a provider's N best-ranked feeds when it has a cap
pub fn top_feeds_for_provider(
    cfg: &GenerateConfig,
    feeds: Vec<Feed>,
    _on_chain: &MarketMap,
) -> Result<(Vec<Feed>, ExclusionReasons)> {
    let mut by_provider: BTreeMap<String, Vec<Feed>> = BTreeMap::new();
    for feed in feeds {
        by_provider.entry(feed.provider().to_string()).or_default().push(feed);
    }

    let mut out = Vec::new();
    let mut exclusions = ExclusionReasons::new();
    for (provider, mut provider_feeds) in by_provider {
        let settings = cfg
            .provider(&provider)
            .ok_or_else(|| MmuError::config(format!("provider {provider} not found")))?;

        let top = settings.filters.top_markets;
        if top == 0 || provider_feeds.len() <= top {
            out.extend(provider_feeds);
            continue;
        }

        info!(provider = %provider, feeds = provider_feeds.len(), top, "filtering top markets per provider");
        sort_feeds(&mut provider_feeds);
        for feed in provider_feeds.split_off(top) {
            exclusions.add_feed(&feed, format!("only selecting top {top} feeds for this provider"));
        }
        out.extend(provider_feeds);
    }

    sort_feeds(&mut out);
    Ok((out, exclusions))
}
