//! Transformer - the ordered transform chains used during generation
//!
//! Feed transforms run first, then asset transforms on enriched feeds, then
//! market-map transforms on the assembled map. Exclusions from every stage
//! are merged into one running set.

pub mod asset_transforms;
pub mod feed_transforms;
pub mod marketmap_transforms;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::GenerateConfig;
use crate::generator::feed::{ExclusionReasons, Feed};
use crate::marketmap::MarketMap;

pub use asset_transforms::AssetInfos;

pub type FeedTransform =
    fn(&GenerateConfig, Vec<Feed>, &MarketMap) -> Result<(Vec<Feed>, ExclusionReasons)>;
pub type AssetTransform = fn(&GenerateConfig, Vec<Feed>) -> Result<(Vec<Feed>, ExclusionReasons)>;
pub type MarketMapTransform = fn(&GenerateConfig, MarketMap) -> Result<(MarketMap, ExclusionReasons)>;

pub struct Transformer {
    feed_transforms: Vec<(&'static str, FeedTransform)>,
    asset_transforms: Vec<(&'static str, AssetTransform)>,
    market_map_transforms: Vec<(&'static str, MarketMapTransform)>,
}

impl Default for Transformer {
    fn default() -> Self {
        Self {
            feed_transforms: vec![
                ("InvertOrDrop", feed_transforms::invert_or_drop),
                ("PruneByLiquidity", feed_transforms::prune_by_liquidity),
                ("PruneByQuoteVolume", feed_transforms::prune_by_quote_volume),
                ("PruneByProviderLiquidity", feed_transforms::prune_by_provider_liquidity),
                ("PruneByProviderUsdVolume", feed_transforms::prune_by_provider_usd_volume),
                ("ResolveNamingAliases", feed_transforms::resolve_naming_aliases),
                ("NormalizeBy", feed_transforms::normalize_by),
                ("DropFeedsWithoutAggregatorIDs", feed_transforms::drop_feeds_without_aggregator_ids),
                ("ResolveCMCConflictsForMarket", feed_transforms::resolve_cmc_conflicts_for_market),
                ("ResolveConflictsForProvider", feed_transforms::resolve_conflicts_for_provider),
                ("TopFeedsForProvider", feed_transforms::top_feeds_for_provider),
            ],
            asset_transforms: vec![
                ("FilterOutCMCTags", asset_transforms::filter_out_cmc_tags),
                ("FilterOutCMCIDs", asset_transforms::filter_out_cmc_ids),
            ],
            market_map_transforms: vec![
                ("PruneMarkets", marketmap_transforms::prune_markets),
                ("ExcludeDisabledProviders", marketmap_transforms::exclude_disabled_providers),
                ("EnableMarkets", marketmap_transforms::enable_markets),
                (
                    "PruneInsufficientlyProvidedMarkets",
                    marketmap_transforms::prune_insufficiently_provided_markets,
                ),
                ("OverrideMinProviderCount", marketmap_transforms::override_min_provider_count),
                ("OverrideMarkets", marketmap_transforms::override_markets),
            ],
        }
    }
}

impl Transformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed_transform_names(&self) -> Vec<&'static str> {
        self.feed_transforms.iter().map(|(name, _)| *name).collect()
    }

    pub fn market_map_transform_names(&self) -> Vec<&'static str> {
        self.market_map_transforms.iter().map(|(name, _)| *name).collect()
    }

    pub fn transform_feeds(
        &self,
        cfg: &GenerateConfig,
        mut feeds: Vec<Feed>,
        on_chain: &MarketMap,
    ) -> Result<(Vec<Feed>, ExclusionReasons)> {
        let mut exclusions = ExclusionReasons::new();
        for (name, transform) in &self.feed_transforms {
            let (next, dropped) = transform(cfg, feeds, on_chain)
                .with_context(|| format!("feed transform {name} failed"))?;
            exclusions.merge(dropped);
            feeds = next;
        }
        info!(remaining = feeds.len(), "feed transforms complete");
        Ok((feeds, exclusions))
    }

    /// Enrich feeds with asset info, then run the asset filters
    pub fn transform_assets(
        &self,
        cfg: &GenerateConfig,
        feeds: Vec<Feed>,
        infos: &AssetInfos,
    ) -> Result<(Vec<Feed>, ExclusionReasons)> {
        let mut feeds = asset_transforms::enrich_feeds(feeds, infos);
        let mut exclusions = ExclusionReasons::new();
        for (name, transform) in &self.asset_transforms {
            let (next, dropped) =
                transform(cfg, feeds).with_context(|| format!("asset transform {name} failed"))?;
            exclusions.merge(dropped);
            feeds = next;
        }
        info!(remaining = feeds.len(), "asset transforms complete");
        Ok((feeds, exclusions))
    }

    /// Run the market-map chain and validate the result
    pub fn transform_market_map(
        &self,
        cfg: &GenerateConfig,
        mut mm: MarketMap,
    ) -> Result<(MarketMap, ExclusionReasons)> {
        let mut exclusions = ExclusionReasons::new();
        for (name, transform) in &self.market_map_transforms {
            let (next, dropped) = transform(cfg, mm)
                .with_context(|| format!("market map transform {name} failed"))?;
            exclusions.merge(dropped);
            mm = next;
        }

        mm.validate()
            .context("generated market map failed validation")?;
        info!(remaining = mm.len(), "market map transforms complete");
        Ok((mm, exclusions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order() {
        let t = Transformer::new();
        let feeds = t.feed_transform_names();
        assert_eq!(feeds.first(), Some(&"InvertOrDrop"));
        assert_eq!(feeds.last(), Some(&"TopFeedsForProvider"));
        let pos = |n: &str| feeds.iter().position(|f| *f == n).unwrap();
        assert!(pos("ResolveNamingAliases") < pos("NormalizeBy"));
        assert!(pos("NormalizeBy") < pos("ResolveConflictsForProvider"));

        let mm = t.market_map_transform_names();
        assert_eq!(
            mm,
            vec![
                "PruneMarkets",
                "ExcludeDisabledProviders",
                "EnableMarkets",
                "PruneInsufficientlyProvidedMarkets",
                "OverrideMinProviderCount",
                "OverrideMarkets",
            ]
        );
    }

    #[test]
    fn test_invalid_final_map_aborts() {
        use crate::types::{Market, ProviderConfig, Ticker};

        let mut pc = ProviderConfig::new("p1", "BTCUSD");
        pc.normalize_by_pair = Some("USDT/USD".parse().unwrap());
        let mut cfg = GenerateConfig::default();
        cfg.min_cex_provider_count = 1;
        let mm = MarketMap::from_markets([Market::new(
            Ticker::new("BTC/USD".parse().unwrap(), 8, 1),
            vec![pc],
        )]);
        let err = Transformer::new().transform_market_map(&cfg, mm).unwrap_err();
        assert!(err.to_string().contains("failed validation"));
    }
}
