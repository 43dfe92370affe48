//! Generation pipeline tests

#[cfg(test)]
mod tests {
    use market_map_updater::config::{GenerateConfig, ProviderSettings, QuoteConfig, SniffConfig};
    use market_map_updater::error::MmuError;
    use market_map_updater::generator::feed::{CmcInfo, ExclusionReasons, Feed};
    use market_map_updater::generator::transformer::feed_transforms::resolve_cmc_conflicts_sorted;
    use market_map_updater::generator::Generator;
    use market_map_updater::marketmap::MarketMap;
    use market_map_updater::store::{JsonProviderStore, ProviderDocument, ProviderMarket};
    use market_map_updater::types::{
        AggregateId, AssetInfo, Market, ProviderConfig, Ticker, TickerMetadata, CMC_VENUE,
    };
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    // ============================================================================
    // Fixtures
    // ============================================================================

    fn make_asset(id: i64, symbol: &str, cmc_id: i64, rank: i64) -> AssetInfo {
        AssetInfo {
            id,
            symbol: symbol.into(),
            cmc_id,
            rank,
            ..Default::default()
        }
    }

    fn make_row(
        id: i64,
        provider: &str,
        pair: (&str, &str),
        assets: (i64, i64),
        price: Decimal,
        depth: f64,
    ) -> ProviderMarket {
        ProviderMarket {
            id,
            target_base: pair.0.into(),
            target_quote: pair.1.into(),
            off_chain_ticker: format!("{}-{}", pair.0, pair.1),
            provider_name: provider.into(),
            base_asset_info_id: assets.0,
            quote_asset_info_id: assets.1,
            reference_price: price,
            negative_depth_two: Some(depth),
            positive_depth_two: Some(depth),
            quote_volume: 1_000_000.0,
            usd_volume: 1_000_000.0,
            ..Default::default()
        }
    }

    fn make_document() -> ProviderDocument {
        ProviderDocument {
            asset_infos: vec![
                make_asset(1, "BTC", 1, 1),
                make_asset(2, "USD", 2781, 5),
                make_asset(3, "ETH", 1027, 2),
                make_asset(4, "MOG", 9999, 300),
                make_asset(5, "USDT", 825, 3),
                make_asset(6, "SOL", 5426, 6),
            ],
            provider_markets: vec![
                make_row(1, "okx", ("BTC", "USD"), (1, 2), dec!(60000), 500.0),
                make_row(2, "kraken", ("BTC", "USD"), (1, 2), dec!(60010), 500.0),
                make_row(3, "okx", ("USDT", "USD"), (5, 2), dec!(1), 500.0),
                make_row(4, "okx", ("ETH", "USDT"), (3, 5), dec!(3000), 500.0),
                make_row(5, "kraken", ("USD", "MOG"), (2, 4), dec!(4), 500.0),
                make_row(6, "okx", ("SOL", "USD"), (6, 2), dec!(150), 50.0),
                make_row(7, "okx", ("FOO", "EUR"), (1, 2), dec!(1), 500.0),
            ],
        }
    }

    fn make_config() -> GenerateConfig {
        let mut cfg = GenerateConfig::default();
        cfg.quotes.insert(
            "USD".into(),
            QuoteConfig {
                min_provider_liquidity: 100.0,
                ..Default::default()
            },
        );
        cfg.quotes.insert(
            "USDT".into(),
            QuoteConfig {
                normalize_by_pair: "USDT/USD".into(),
                ..Default::default()
            },
        );
        cfg.providers.insert("okx".into(), ProviderSettings::default());
        cfg.providers.insert("kraken".into(), ProviderSettings::default());
        cfg
    }

    fn make_generator() -> Generator {
        Generator::new(Arc::new(JsonProviderStore::new(make_document())))
    }

    fn make_on_chain_sol(enabled: bool) -> MarketMap {
        let mut ticker = Ticker::new("SOL/USD".parse().unwrap(), 8, 1);
        ticker.enabled = enabled;
        ticker.metadata_json = TickerMetadata {
            reference_price: dec!(150),
            liquidity: Decimal::ZERO,
            aggregate_ids: vec![AggregateId {
                venue: CMC_VENUE.into(),
                id: "5426".into(),
            }],
        }
        .to_json()
        .unwrap();
        MarketMap::from_markets([Market::new(ticker, vec![ProviderConfig::new("okx", "SOL-USD")])])
    }

    async fn generate(on_chain: &MarketMap, cfg: &GenerateConfig) -> (MarketMap, ExclusionReasons) {
        make_generator()
            .generate_market_map(cfg, &SniffConfig::default(), on_chain)
            .await
            .unwrap()
    }

    // ============================================================================
    // Pipeline
    // ============================================================================

    #[tokio::test]
    async fn test_generated_markets() {
        let (mm, excl) = generate(&MarketMap::new(), &make_config()).await;

        assert_eq!(
            mm.tickers(),
            vec!["BTC/USD", "ETH/USD", "MOG/USD", "USDT/USD"],
            "SOL is too illiquid and FOO/EUR has no target quote"
        );
        assert!(excl.contains("SOL/USD"));
        assert!(excl.contains("FOO/EUR"));

        let btc = mm.get("BTC/USD").unwrap();
        assert_eq!(btc.provider_configs.len(), 2);
        assert!(!btc.is_enabled());
        let metadata = btc.ticker.metadata().unwrap().unwrap();
        assert_eq!(metadata.reference_price, dec!(60005));
        assert_eq!(metadata.primary_id(), Some("1"));

        let eth = mm.get("ETH/USD").unwrap();
        assert_eq!(
            eth.provider_configs[0].normalize_by_pair,
            Some("USDT/USD".parse().unwrap()),
            "USDT quotes are normalized into USD"
        );
    }

    #[tokio::test]
    async fn test_inversion_end_to_end() {
        let (mm, _) = generate(&MarketMap::new(), &make_config()).await;

        let mog = mm.get("MOG/USD").expect("USD/MOG is inverted into MOG/USD");
        assert!(mog.provider_configs[0].invert);
        assert_eq!(mog.provider_configs[0].off_chain_ticker, "USD-MOG");
        let metadata = mog.ticker.metadata().unwrap().unwrap();
        assert_eq!(metadata.reference_price, dec!(0.25));
        assert_eq!(metadata.primary_id(), Some("9999"), "CMC ids swap with the pair");
    }

    #[tokio::test]
    async fn test_threshold_relaxation_for_enabled_market() {
        let mut cfg = make_config();
        cfg.relaxed_min_volume_and_liquidity_factor = 0.4;

        let (mm, _) = generate(&make_on_chain_sol(true), &cfg).await;
        assert!(mm.contains("SOL/USD"), "50 >= 100 * 0.4 once SOL/USD is live");

        let (mm, _) = generate(&make_on_chain_sol(false), &cfg).await;
        assert!(!mm.contains("SOL/USD"), "disabled markets get no relaxation");
    }

    #[tokio::test]
    async fn test_generation_is_deterministic() {
        let cfg = make_config();
        let on_chain = make_on_chain_sol(true);
        let first = generate(&on_chain, &cfg).await;

        for _ in 0..20 {
            let next = generate(&on_chain, &cfg).await;
            assert_eq!(next.0, first.0);
            assert_eq!(next.1, first.1);
        }
    }

    #[tokio::test]
    async fn test_missing_quote_config_is_fatal() {
        let mut cfg = make_config();
        cfg.quotes.remove("USDT");
        cfg.quotes.insert(
            "MOG".into(),
            QuoteConfig {
                normalize_by_pair: "MOG/USDT".into(),
                ..Default::default()
            },
        );

        let err = make_generator()
            .generate_market_map(&cfg, &SniffConfig::default(), &MarketMap::new())
            .await
            .unwrap_err();
        assert!(MmuError::is_config(&err), "unexpected error: {err:#}");
    }

    // ============================================================================
    // Invariants
    // ============================================================================

    #[test]
    fn test_unsorted_cmc_conflict_input_is_invariant_violation() {
        let feed = |provider: &str, rank: i64| {
            let mut f = Feed::new(
                "BTC/USD".parse().unwrap(),
                ProviderConfig::new(provider, "BTC-USD"),
                Decimal::ONE,
            );
            f.cmc = CmcInfo {
                base_id: rank,
                quote_id: 2781,
                base_rank: rank,
                quote_rank: 1,
            };
            f
        };

        let mut excl = ExclusionReasons::new();
        let err = resolve_cmc_conflicts_sorted("BTC/USD", vec![feed("okx", 5), feed("kraken", 1)], &mut excl)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MmuError>(),
            Some(MmuError::InvariantViolation(_))
        ));
    }
}
