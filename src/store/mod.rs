//! Provider store - read-only source of provider markets and asset infos
//!
//! `JsonProviderStore` serves a snapshot document of the form
//! `{ "asset_infos": [...], "provider_markets": [...] }`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::GenerateConfig;
use crate::generator::feed::{CmcInfo, Feed, LiquidityInfo};
use crate::generator::transformer::AssetInfos;
use crate::types::{AssetInfo, CurrencyPair, ProviderConfig};

#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// Feeds for every provider named in `cfg.providers`
    async fn feeds(&self, cfg: &GenerateConfig) -> Result<Vec<Feed>>;

    /// Asset infos keyed by CMC id
    async fn asset_infos(&self) -> Result<AssetInfos>;
}

/// One provider's listing of one market
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderMarket {
    pub id: i64,
    pub target_base: String,
    pub target_quote: String,
    pub off_chain_ticker: String,
    pub provider_name: String,
    pub base_asset_info_id: i64,
    pub quote_asset_info_id: i64,
    pub metadata_json: String,
    pub reference_price: Decimal,
    pub negative_depth_two: Option<f64>,
    pub positive_depth_two: Option<f64>,
    pub quote_volume: f64,
    pub usd_volume: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderDocument {
    pub asset_infos: Vec<AssetInfo>,
    pub provider_markets: Vec<ProviderMarket>,
}

pub struct JsonProviderStore {
    document: ProviderDocument,
}

impl JsonProviderStore {
    pub fn new(document: ProviderDocument) -> Self {
        Self { document }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read provider data {}", path.display()))?;
        let document: ProviderDocument = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse provider data {}", path.display()))?;
        info!(
            path = %path.display(),
            assets = document.asset_infos.len(),
            markets = document.provider_markets.len(),
            "loaded provider data"
        );
        Ok(Self::new(document))
    }

    fn to_feed(&self, row: &ProviderMarket, assets: &BTreeMap<i64, &AssetInfo>) -> Option<Feed> {
        let pair = CurrencyPair::new(&row.target_base, &row.target_quote);
        if let Err(e) = pair.validate() {
            warn!(provider = %row.provider_name, ticker = %row.off_chain_ticker, error = %e, "skipping provider market");
            return None;
        }

        let base = assets.get(&row.base_asset_info_id);
        let quote = assets.get(&row.quote_asset_info_id);

        let mut pc = ProviderConfig::new(&row.provider_name, &row.off_chain_ticker);
        pc.metadata_json = row.metadata_json.clone();

        let mut feed = Feed::new(pair, pc, row.reference_price);
        feed.daily_quote_volume = row.quote_volume;
        feed.daily_usd_volume = row.usd_volume;
        feed.liquidity = match (row.negative_depth_two, row.positive_depth_two) {
            (Some(negative), Some(positive)) => Some(LiquidityInfo {
                negative_depth_two: negative,
                positive_depth_two: positive,
            }),
            _ => None,
        };
        feed.cmc = CmcInfo {
            base_id: base.map(|a| a.cmc_id).unwrap_or(0),
            quote_id: quote.map(|a| a.cmc_id).unwrap_or(0),
            base_rank: base.map(|a| a.rank).unwrap_or(0),
            quote_rank: quote.map(|a| a.rank).unwrap_or(0),
        };
        Some(feed)
    }
}

#[async_trait]
impl ProviderStore for JsonProviderStore {
    async fn feeds(&self, cfg: &GenerateConfig) -> Result<Vec<Feed>> {
        let assets: BTreeMap<i64, &AssetInfo> =
            self.document.asset_infos.iter().map(|a| (a.id, a)).collect();

        let feeds: Vec<Feed> = self
            .document
            .provider_markets
            .iter()
            .filter(|row| cfg.providers.contains_key(&row.provider_name))
            .filter_map(|row| self.to_feed(row, &assets))
            .collect();

        debug!(feeds = feeds.len(), "queried feeds");
        Ok(feeds)
    }

    async fn asset_infos(&self) -> Result<AssetInfos> {
        Ok(self
            .document
            .asset_infos
            .iter()
            .filter(|a| a.cmc_id != 0)
            .map(|a| (a.cmc_id, a.clone()))
            .collect())
    }
}
