//! Diff strategy: the markets needed to move the current map to the generated one

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info, warn};

use crate::marketmap::MarketMap;
use crate::sniff::{screen_addresses, ScamScreener};
use crate::generator::transformer::AssetInfos;
use crate::types::{Market, CMC_VENUE};

/// Updates (existing markets, plus dependencies they pull in) and additions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    pub updates: Vec<Market>,
    pub additions: Vec<Market>,
}

/// Strip providers of enabled markets whose normalize-by target is disabled,
/// dropping markets left below their minimum provider count
pub fn prune_normalize_by_pairs(generated: &MarketMap) -> Result<MarketMap> {
    info!(markets = generated.len(), "removing provider configs with disabled normalize by pairs");

    let mut out = generated.clone();
    for (ticker, market) in generated.iter() {
        if !market.is_enabled() {
            continue;
        }

        let mut kept = Vec::with_capacity(market.provider_configs.len());
        for pc in &market.provider_configs {
            let Some(pair) = &pc.normalize_by_pair else {
                kept.push(pc.clone());
                continue;
            };
            let Some(norm) = generated.get(&pair.to_string()) else {
                bail!("unable to find normalize for {pair}");
            };
            if norm.is_enabled() {
                kept.push(pc.clone());
            } else {
                info!(market = %ticker, normalize_by = %pair, provider = %pc.name, "removing provider with disabled normalize by pair");
            }
        }

        if (kept.len() as u64) < market.ticker.min_provider_count {
            debug!(
                market = %ticker,
                providers = kept.len(),
                required = market.ticker.min_provider_count,
                "excluding market because it was pruned"
            );
            out.remove(ticker);
        } else if let Some(m) = out.get_mut(ticker) {
            m.provider_configs = kept;
        }
    }
    Ok(out)
}

/// True when the market's base token is flagged by the screener.
///
/// The first chain that answers decides. Fails open.
pub async fn is_scam_market(market: &Market, infos: &AssetInfos, screener: &dyn ScamScreener) -> bool {
    let ticker = market.key();
    let metadata = match market.ticker.metadata() {
        Ok(Some(metadata)) => metadata,
        Ok(None) => return false,
        Err(e) => {
            warn!(market = %ticker, error = %e, "failed to decode market metadata for scam check");
            return false;
        }
    };

    let Some(cmc_id) = metadata.id_for_venue(CMC_VENUE) else {
        debug!(market = %ticker, "no CMC id for scam check");
        return false;
    };
    let Ok(cmc_id) = cmc_id.parse::<i64>() else {
        error!(market = %ticker, id = %cmc_id, "failed to parse CMC ID");
        return false;
    };
    let Some(info) = infos.get(&cmc_id).filter(|info| !info.multi_addresses.is_empty()) else {
        info!(market = %ticker, "unable to find token asset info for scam check");
        return false;
    };

    info!(market = %ticker, chains = info.multi_addresses.len(), "checking if token is a scam");
    match screen_addresses(screener, &info.multi_addresses).await {
        Some(([chain, address], scam)) => {
            debug!(market = %ticker, chain = %chain, address = %address, scam, "token screened");
            scam
        }
        None => {
            warn!(market = %ticker, "every scam check failed, keeping market");
            false
        }
    }
}

/// Walk the generated map in ticker order and collect the changes against `current`
pub async fn market_map_upserts(
    current: &MarketMap,
    generated: &MarketMap,
    infos: &AssetInfos,
    screener: Option<&dyn ScamScreener>,
) -> Result<Diff> {
    if current == generated {
        info!("market maps are equal, no upserts");
        return Ok(Diff::default());
    }

    let generated = prune_normalize_by_pairs(generated)?;
    let mut working = current.clone();
    let mut diff = Diff::default();

    for (ticker, market) in generated.iter() {
        match working.get(ticker) {
            Some(existing) if existing == market => continue,
            Some(_) => {}
            None => {
                if let Some(screener) = screener {
                    if is_scam_market(market, infos, screener).await {
                        info!(market = %ticker, "scam token detected, skipping addition");
                        continue;
                    }
                }
                diff.additions.push(market.clone());
                continue;
            }
        }

        for pair in market.normalize_by_pairs() {
            let target = pair.to_string();
            if working.contains(&target) {
                continue;
            }
            let Some(dependency) = generated.get(&target) else {
                bail!("market {ticker}'s normalize-by market {target} not found in generated market-map");
            };
            // a dependency listed earlier as an addition is promoted to an update
            diff.additions.retain(|m| m.key() != target);
            diff.updates.push(dependency.clone());
            working.insert(dependency.clone());
        }

        diff.updates.push(market.clone());
        working.insert(market.clone());
    }

    working
        .validate()
        .context("updated market-map is invalid")?;

    info!(updates = diff.updates.len(), additions = diff.additions.len(), "determined upserts");
    Ok(diff)
}
