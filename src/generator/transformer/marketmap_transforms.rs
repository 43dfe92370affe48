//! Market map transforms
//!
//! Whole-map rules run after feeds are assembled into candidate markets.

use anyhow::Result;
use tracing::{debug, info};

use crate::config::GenerateConfig;
use crate::generator::feed::ExclusionReasons;
use crate::marketmap::MarketMap;

/// Drop excluded tickers, then tickers missing from a non-empty allow-list
pub fn prune_markets(cfg: &GenerateConfig, mm: MarketMap) -> Result<(MarketMap, ExclusionReasons)> {
    info!(markets = mm.len(), "pruning markets");

    let mut out = MarketMap::new();
    let mut exclusions = ExclusionReasons::new();
    for (ticker, market) in mm.markets {
        if cfg.excluded_currency_pairs.contains(&ticker) {
            exclusions.add_market(&market, "PruneMarkets: ticker is in excluded currency pairs");
            continue;
        }
        if !cfg.allowed_currency_pairs.is_empty() && !cfg.allowed_currency_pairs.contains(&ticker) {
            exclusions.add_market(&market, "PruneMarkets: ticker is not in allowed currency pairs");
            continue;
        }
        out.insert(market);
    }

    info!(remaining = out.len(), "pruned markets");
    Ok((out, exclusions))
}

/// Strip the (ticker, provider) entries named in `disable_providers`
pub fn exclude_disabled_providers(
    cfg: &GenerateConfig,
    mut mm: MarketMap,
) -> Result<(MarketMap, ExclusionReasons)> {
    let mut exclusions = ExclusionReasons::new();

    for (ticker, disabled) in &cfg.disable_providers {
        let Some(market) = mm.get_mut(ticker) else {
            continue;
        };
        market.provider_configs.retain(|pc| {
            if disabled.contains(&pc.name) {
                exclusions.add(ticker.clone(), pc.name.clone(), "ExcludeDisabledProviders: provider disabled for ticker");
                false
            } else {
                true
            }
        });
        debug!(ticker = %ticker, remaining = market.provider_configs.len(), "excluded disabled providers");
    }

    Ok((mm, exclusions))
}

/// Force every market enabled when `enable_all` is set
pub fn enable_markets(cfg: &GenerateConfig, mut mm: MarketMap) -> Result<(MarketMap, ExclusionReasons)> {
    if cfg.enable_all {
        info!(markets = mm.len(), "enabling all markets");
        for market in mm.markets.values_mut() {
            market.ticker.enabled = true;
        }
    }
    Ok((mm, ExclusionReasons::new()))
}

/// Drop markets whose non-supplemental providers cannot meet the required count
pub fn prune_insufficiently_provided_markets(
    cfg: &GenerateConfig,
    mm: MarketMap,
) -> Result<(MarketMap, ExclusionReasons)> {
    info!(markets = mm.len(), "pruning insufficiently provided markets");

    let mut out = MarketMap::new();
    let mut exclusions = ExclusionReasons::new();
    for (_, market) in mm.markets {
        let counted = market
            .provider_configs
            .iter()
            .filter(|pc| !cfg.is_supplemental(&pc.name))
            .count() as u64;
        let required = market
            .ticker
            .min_provider_count
            .max(cfg.kind_min_provider_count(&market.provider_configs));

        if counted < required {
            let reason = format!(
                "PruneInsufficientlyProvidedMarkets: {counted} provider(s), {required} required"
            );
            exclusions.add_market(&market, reason);
            continue;
        }
        out.insert(market);
    }

    info!(remaining = out.len(), "pruned insufficiently provided markets");
    Ok((out, exclusions))
}

/// Apply `min_provider_count_override` to every market when set
pub fn override_min_provider_count(
    cfg: &GenerateConfig,
    mut mm: MarketMap,
) -> Result<(MarketMap, ExclusionReasons)> {
    let count = cfg.min_provider_count_override;
    if count > 0 {
        info!(count, "overriding min provider count");
        for market in mm.markets.values_mut() {
            market.ticker.min_provider_count = count;
        }
    }
    Ok((mm, ExclusionReasons::new()))
}

/// Replace or add every market from `market_map_override`
pub fn override_markets(cfg: &GenerateConfig, mut mm: MarketMap) -> Result<(MarketMap, ExclusionReasons)> {
    for market in cfg.market_map_override.markets.values() {
        debug!(ticker = %market.ticker, replaced = mm.contains(&market.key()), "overriding market");
        mm.insert(market.clone());
    }
    Ok((mm, ExclusionReasons::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;
    use crate::types::{Market, ProviderConfig, Ticker};

    fn make_market(pair: &str, min: u64, providers: &[&str]) -> Market {
        Market::new(
            Ticker::new(pair.parse().unwrap(), 8, min),
            providers
                .iter()
                .map(|p| ProviderConfig::new(*p, pair.replace('/', "")))
                .collect(),
        )
    }

    fn make_config(providers: &[(&str, ProviderSettings)]) -> GenerateConfig {
        let mut cfg = GenerateConfig::default();
        for (name, settings) in providers {
            cfg.providers.insert(name.to_string(), settings.clone());
        }
        cfg.min_cex_provider_count = 0;
        cfg.min_dex_provider_count = 0;
        cfg
    }

    #[test]
    fn test_prune_markets_exclusion_beats_allow_list() {
        let mut cfg = make_config(&[]);
        cfg.excluded_currency_pairs.insert("BTC/USD".into());
        cfg.allowed_currency_pairs.insert("BTC/USD".into());
        cfg.allowed_currency_pairs.insert("ETH/USD".into());

        let mm = MarketMap::from_markets([
            make_market("BTC/USD", 1, &["p1"]),
            make_market("ETH/USD", 1, &["p1"]),
            make_market("SOL/USD", 1, &["p1"]),
        ]);
        let (out, excl) = prune_markets(&cfg, mm).unwrap();
        assert_eq!(out.tickers(), vec!["ETH/USD".to_string()]);
        assert!(excl.contains("BTC/USD"));
        assert!(excl.contains("SOL/USD"));
    }

    #[test]
    fn test_prune_markets_no_allow_list() {
        let mut cfg = make_config(&[]);
        cfg.excluded_currency_pairs.insert("BTC/USD".into());
        let mm = MarketMap::from_markets([make_market("BTC/USD", 1, &["p1"]), make_market("ETH/USD", 1, &["p1"])]);
        let (out, _) = prune_markets(&cfg, mm).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_exclude_disabled_providers() {
        let mut cfg = make_config(&[]);
        cfg.disable_providers
            .insert("BTC/USD".into(), vec!["p2".into(), "p9".into()]);
        let mm = MarketMap::from_markets([
            make_market("BTC/USD", 1, &["p1", "p2"]),
            make_market("ETH/USD", 1, &["p1", "p2"]),
        ]);
        let (out, excl) = exclude_disabled_providers(&cfg, mm).unwrap();
        assert_eq!(out.get("BTC/USD").unwrap().provider_configs.len(), 1);
        assert_eq!(out.get("ETH/USD").unwrap().provider_configs.len(), 2);
        assert_eq!(excl.get("BTC/USD").unwrap()[0].provider, "p2");
    }

    #[test]
    fn test_enable_markets() {
        let mm = MarketMap::from_markets([make_market("BTC/USD", 1, &["p1"])]);
        let (out, _) = enable_markets(&make_config(&[]), mm.clone()).unwrap();
        assert!(!out.is_enabled("BTC/USD"));

        let mut cfg = make_config(&[]);
        cfg.enable_all = true;
        let (out, _) = enable_markets(&cfg, mm).unwrap();
        assert!(out.is_enabled("BTC/USD"));
    }

    #[test]
    fn test_prune_insufficiently_provided() {
        let cfg = make_config(&[("p1", ProviderSettings::default())]);
        let mm = MarketMap::from_markets([
            make_market("BTC/USD", 2, &["p1"]),
            make_market("ETH/USD", 1, &["p1"]),
        ]);
        let (out, excl) = prune_insufficiently_provided_markets(&cfg, mm).unwrap();
        assert_eq!(out.tickers(), vec!["ETH/USD".to_string()]);
        assert!(excl.contains("BTC/USD"));
    }

    #[test]
    fn test_prune_ignores_supplemental() {
        let cfg = make_config(&[
            ("p1", ProviderSettings::default()),
            ("p2", ProviderSettings { is_supplemental: true, ..Default::default() }),
            ("p3", ProviderSettings::default()),
        ]);
        let mm = MarketMap::from_markets([
            make_market("BTC/USD", 2, &["p1", "p2", "p3"]),
            make_market("ETH/USD", 2, &["p1", "p2"]),
        ]);
        let (out, _) = prune_insufficiently_provided_markets(&cfg, mm).unwrap();
        assert_eq!(out.tickers(), vec!["BTC/USD".to_string()]);
        assert_eq!(out.get("BTC/USD").unwrap().provider_configs.len(), 3);
    }

    #[test]
    fn test_prune_uses_kind_minimum() {
        let mut cfg = make_config(&[
            ("cex", ProviderSettings::default()),
            ("dex", ProviderSettings { is_dex: true, ..Default::default() }),
        ]);
        cfg.min_cex_provider_count = 2;
        cfg.min_dex_provider_count = 1;
        let mm = MarketMap::from_markets([
            make_market("BTC/USD", 1, &["cex"]),
            make_market("FOO/USD", 1, &["dex"]),
        ]);
        let (out, _) = prune_insufficiently_provided_markets(&cfg, mm).unwrap();
        assert_eq!(out.tickers(), vec!["FOO/USD".to_string()]);
    }

    #[test]
    fn test_override_min_provider_count_after_prune() {
        let mut cfg = make_config(&[
            ("p1", ProviderSettings::default()),
            ("p2", ProviderSettings::default()),
        ]);
        cfg.min_cex_provider_count = 2;
        cfg.min_dex_provider_count = 1;
        cfg.min_provider_count_override = 1;

        let mm = MarketMap::from_markets([
            make_market("BTC/USD", 2, &["p1"]),
            make_market("ETH/USD", 2, &["p1", "p2"]),
        ]);
        let (pruned, excl) = prune_insufficiently_provided_markets(&cfg, mm).unwrap();
        let (out, _) = override_min_provider_count(&cfg, pruned).unwrap();
        assert!(excl.contains("BTC/USD"), "pruning uses the declared threshold");
        assert_eq!(out.get("ETH/USD").unwrap().ticker.min_provider_count, 1);
    }

    #[test]
    fn test_override_markets() {
        let mut cfg = make_config(&[]);
        let mut replacement = make_market("BTC/USD", 3, &["p1", "p2", "p3"]);
        replacement.ticker.decimals = 9;
        replacement.ticker.enabled = true;
        cfg.market_map_override = MarketMap::from_markets([replacement.clone(), make_market("ETH/USD", 1, &["p1"])]);

        let mm = MarketMap::from_markets([make_market("BTC/USD", 2, &["p1"]), make_market("SOL/USD", 1, &["p1"])]);
        let (out, _) = override_markets(&cfg, mm).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.get("BTC/USD"), Some(&replacement));
        assert_eq!(out.get("SOL/USD").unwrap().ticker.min_provider_count, 1);
    }
}
