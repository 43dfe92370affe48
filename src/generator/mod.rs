//! Generator - builds a candidate market map from provider feeds
//!
//! Feeds come from a `ProviderStore`, pass through the feed and asset
//! transform chains, are optionally screened for scam tokens, and are then
//! assembled into a market map that runs through the market-map chain.

pub mod feed;
pub mod transformer;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::{GenerateConfig, SniffConfig};
use crate::marketmap::MarketMap;
use crate::sniff::ScamScreener;
use crate::store::ProviderStore;

use feed::{to_market_map, ExclusionReasons, Feed};
use transformer::{asset_transforms, AssetInfos, Transformer};

pub struct Generator {
    transformer: Transformer,
    store: Arc<dyn ProviderStore>,
    screener: Option<Arc<dyn ScamScreener>>,
}

impl Generator {
    pub fn new(store: Arc<dyn ProviderStore>) -> Self {
        Self {
            transformer: Transformer::default(),
            store,
            screener: None,
        }
    }

    pub fn with_screener(mut self, screener: Arc<dyn ScamScreener>) -> Self {
        self.screener = Some(screener);
        self
    }

    /// Query the store and run the full pipeline
    pub async fn generate_market_map(
        &self,
        cfg: &GenerateConfig,
        sniff: &SniffConfig,
        on_chain: &MarketMap,
    ) -> Result<(MarketMap, ExclusionReasons)> {
        let feeds = self
            .store
            .feeds(cfg)
            .await
            .context("failed to query provider feeds")?;
        let infos = self
            .store
            .asset_infos()
            .await
            .context("failed to query asset infos")?;
        info!(feeds = feeds.len(), assets = infos.len(), "queried provider store");

        self.generate_from(cfg, sniff, feeds, &infos, on_chain).await
    }

    /// Run the pipeline over already-loaded feeds
    pub async fn generate_from(
        &self,
        cfg: &GenerateConfig,
        sniff: &SniffConfig,
        feeds: Vec<Feed>,
        infos: &AssetInfos,
        on_chain: &MarketMap,
    ) -> Result<(MarketMap, ExclusionReasons)> {
        let mut exclusions = ExclusionReasons::new();

        let (feeds, dropped) = self.transformer.transform_feeds(cfg, feeds, on_chain)?;
        exclusions.merge(dropped);

        let (mut feeds, dropped) = self.transformer.transform_assets(cfg, feeds, infos)?;
        exclusions.merge(dropped);

        if let (true, Some(screener)) = (sniff.enabled, self.screener.as_deref()) {
            let (screened, dropped) =
                asset_transforms::sniff_out_scam_tokens(sniff, feeds, screener).await?;
            exclusions.merge(dropped);
            feeds = screened;
        }

        let mm = to_market_map(&feeds, cfg).context("failed to assemble market map")?;
        info!(markets = mm.len(), "assembled market map");

        let (mm, dropped) = self.transformer.transform_market_map(cfg, mm)?;
        exclusions.merge(dropped);

        info!(markets = mm.len(), excluded = exclusions.len(), "generated market map");
        Ok((mm, exclusions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderSettings, QuoteConfig};
    use crate::sniff::MockScamScreener;
    use crate::store::{JsonProviderStore, ProviderDocument, ProviderMarket};
    use crate::types::AssetInfo;
    use rust_decimal_macros::dec;

    fn make_config() -> GenerateConfig {
        let mut cfg = GenerateConfig::default();
        cfg.quotes.insert("USD".into(), QuoteConfig::default());
        cfg.providers.insert("p1".into(), ProviderSettings::default());
        cfg.providers.insert("p2".into(), ProviderSettings::default());
        cfg
    }

    fn make_row(id: i64, provider: &str, base_asset: i64) -> ProviderMarket {
        ProviderMarket {
            id,
            target_base: "MEME".into(),
            target_quote: "USD".into(),
            off_chain_ticker: "MEME-USD".into(),
            provider_name: provider.into(),
            base_asset_info_id: base_asset,
            quote_asset_info_id: 2,
            reference_price: dec!(0.5),
            negative_depth_two: Some(10.0),
            positive_depth_two: Some(10.0),
            quote_volume: 10.0,
            usd_volume: 10.0,
            ..Default::default()
        }
    }

    fn make_store() -> Arc<dyn ProviderStore> {
        Arc::new(JsonProviderStore::new(ProviderDocument {
            asset_infos: vec![
                AssetInfo {
                    id: 1,
                    symbol: "MEME".into(),
                    cmc_id: 10,
                    rank: 50,
                    multi_addresses: vec![["Ethereum".into(), "0xmeme".into()]],
                    ..Default::default()
                },
                AssetInfo { id: 2, symbol: "USD".into(), cmc_id: 2781, rank: 1, ..Default::default() },
            ],
            provider_markets: vec![make_row(1, "p1", 1), make_row(2, "p2", 1)],
        }))
    }

    #[tokio::test]
    async fn test_generate_market_map() {
        let generator = Generator::new(make_store());
        let (mm, _) = generator
            .generate_market_map(&make_config(), &SniffConfig::default(), &MarketMap::new())
            .await
            .unwrap();

        let market = mm.get("MEME/USD").expect("market generated");
        assert!(!market.ticker.enabled, "generated markets start disabled");
        assert_eq!(market.provider_configs.len(), 2);
        assert_eq!(market.ticker.decimals, 8);
        let metadata = market.ticker.metadata().unwrap().unwrap();
        assert_eq!(metadata.primary_id(), Some("10"));
    }

    #[tokio::test]
    async fn test_scam_screening_only_when_enabled() {
        let mut screener = MockScamScreener::new();
        screener.expect_is_scam().times(1).returning(|_, _| Ok(true));
        let generator = Generator::new(make_store()).with_screener(Arc::new(screener));

        let sniff = SniffConfig {
            enabled: true,
            api_key: "key".into(),
            ..Default::default()
        };
        let (mm, excl) = generator
            .generate_market_map(&make_config(), &sniff, &MarketMap::new())
            .await
            .unwrap();
        assert!(mm.is_empty());
        assert_eq!(excl.get("MEME/USD").map(|r| r.len()), Some(2));
    }
}
