//! Upsert generation
//!
//! Turns the difference between the on-chain map and a merged map into
//! ordered lists of markets to update and to add.

pub mod strategy;

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use crate::config::UpsertConfig;
use crate::error::MmuError;
use crate::generator::transformer::AssetInfos;
use crate::marketmap::MarketMap;
use crate::sniff::ScamScreener;
use crate::types::Market;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Upserts {
    pub updates: Vec<Market>,
    pub additions: Vec<Market>,
}

impl Upserts {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.additions.is_empty()
    }
}

pub async fn generate_upserts(
    current: &MarketMap,
    generated: &MarketMap,
    cfg: &UpsertConfig,
    infos: &AssetInfos,
    screener: Option<&dyn ScamScreener>,
) -> Result<Upserts> {
    let diff = strategy::market_map_upserts(current, generated, infos, screener)
        .await
        .context("failed to get market map updates and additions")?;

    let updates = remove_from_updates(diff.updates, &cfg.restricted_markets);
    info!(updates = updates.len(), "determined updates");

    let updates = order_normalize_markets_first(updates).context("failed to reorder updates")?;
    let additions = order_normalize_markets_first(diff.additions).context("failed to reorder additions")?;

    if updates.is_empty() && additions.is_empty() {
        info!("no upserts found");
        return Ok(Upserts::default());
    }

    let details: Vec<String> = updates
        .iter()
        .chain(additions.iter())
        .filter_map(|m| m.validate().err().map(|e| e.to_string()))
        .collect();
    if !details.is_empty() {
        return Err(MmuError::InvalidMarkets {
            count: details.len(),
            details,
        }
        .into());
    }

    current
        .with_applied(updates.iter().chain(additions.iter()))
        .validate()
        .context("generated invalid upserts in marketmap")?;

    info!(updates = updates.len(), additions = additions.len(), "generated upserts");
    Ok(Upserts { updates, additions })
}

/// Drop the restricted tickers, keeping order
pub fn remove_from_updates(updates: Vec<Market>, restricted: &[String]) -> Vec<Market> {
    if restricted.is_empty() {
        return updates;
    }
    updates
        .into_iter()
        .filter(|m| !restricted.contains(&m.key()))
        .collect()
}

/// Move normalize-by targets present in `upserts` to the front, in first-seen order
pub fn order_normalize_markets_first(upserts: Vec<Market>) -> Result<Vec<Market>> {
    let expected = upserts.len();
    let by_ticker: BTreeMap<String, &Market> = upserts.iter().map(|m| (m.key(), m)).collect();

    let mut seen = BTreeSet::new();
    let mut output: Vec<Market> = Vec::with_capacity(expected);
    for market in &upserts {
        for pair in market.normalize_by_pairs() {
            let target = pair.to_string();
            if let Some(dep) = by_ticker.get(&target) {
                if seen.insert(target) {
                    output.push((*dep).clone());
                }
            }
        }
    }

    let mut emitted = seen;
    for market in &upserts {
        if emitted.insert(market.key()) {
            output.push(market.clone());
        }
    }

    if output.len() != expected {
        return Err(MmuError::invariant(format!(
            "invalid reorder: expected {expected} outputs, got {}",
            output.len()
        ))
        .into());
    }
    Ok(output)
}
