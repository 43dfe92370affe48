//! Configuration management for the market-map updater
//!
//! Loads from config files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use crate::logging::LogConfig;
use crate::marketmap::MarketMap;
use crate::types::{CurrencyPair, ProviderConfig};

/// Top-level settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub generate: GenerateConfig,
    #[serde(default)]
    pub upsert: UpsertConfig,
    #[serde(default)]
    pub sniff: SniffConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

/// Rules applied while generating a market map
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerateConfig {
    /// Target quotes; feeds are inverted or normalized into these
    pub quotes: BTreeMap<String, QuoteConfig>,
    /// Providers to pull feeds from
    pub providers: BTreeMap<String, ProviderSettings>,
    /// Threshold multiplier for bases already enabled on chain
    pub relaxed_min_volume_and_liquidity_factor: f64,
    pub excluded_currency_pairs: BTreeSet<String>,
    /// When non-empty, only these tickers survive
    pub allowed_currency_pairs: BTreeSet<String>,
    pub exclude_cmc_tags: Vec<String>,
    pub exclude_cmc_ids: BTreeSet<i64>,
    /// Ticker -> provider names to strip
    pub disable_providers: BTreeMap<String, Vec<String>>,
    pub enable_all: bool,
    pub min_cex_provider_count: u64,
    pub min_dex_provider_count: u64,
    /// Applied after pruning when non-zero
    pub min_provider_count_override: u64,
    pub market_map_override: MarketMap,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QuoteConfig {
    /// Minimum 24h quote volume
    pub min_provider_volume: f64,
    /// Minimum depth on each side at +/-2%
    pub min_provider_liquidity: f64,
    /// Pair used to convert this quote into a target quote, e.g. "USDT/USD"
    pub normalize_by_pair: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Minimum 24h USD volume
    pub min_provider_volume: f64,
    pub min_provider_liquidity: f64,
    /// Supplemental providers do not count toward provider minimums
    pub is_supplemental: bool,
    pub is_dex: bool,
    /// Drop feeds lacking a CMC id
    pub require_aggregate_ids: bool,
    pub ignore_liquidity: bool,
    pub ignore_volume: bool,
    pub filters: ProviderFilters,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderFilters {
    /// Keep only the N best-ranked feeds; 0 keeps all
    pub top_markets: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpsertConfig {
    /// Tickers never emitted as updates
    pub restricted_markets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SniffConfig {
    /// Run scam screening during generation
    pub enabled: bool,
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// CMC ids never screened
    pub whitelist: BTreeSet<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// REST endpoint serving the on-chain market map; empty means use files
    pub api_url: String,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            quotes: BTreeMap::new(),
            providers: BTreeMap::new(),
            relaxed_min_volume_and_liquidity_factor: 1.0, // no relaxation
            excluded_currency_pairs: BTreeSet::new(),
            allowed_currency_pairs: BTreeSet::new(),
            exclude_cmc_tags: Vec::new(),
            exclude_cmc_ids: BTreeSet::new(),
            disable_providers: BTreeMap::new(),
            enable_all: false,
            min_cex_provider_count: 1,
            min_dex_provider_count: 1,
            min_provider_count_override: 0, // off
            market_map_override: MarketMap::default(),
        }
    }
}

impl Default for SniffConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            base_url: "https://tokensniffer.com/api/v2".to_string(),
            timeout_secs: 30,
            whitelist: BTreeSet::new(),
        }
    }
}

impl GenerateConfig {
    pub fn is_target_quote(&self, symbol: &str) -> bool {
        self.quotes.contains_key(symbol)
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderSettings> {
        self.providers.get(name)
    }

    pub fn is_supplemental(&self, name: &str) -> bool {
        self.provider(name).map(|p| p.is_supplemental).unwrap_or(false)
    }

    /// Parsed normalize-by pair for a quote, if one is configured
    pub fn normalize_pair_for(&self, quote: &str) -> Result<Option<CurrencyPair>> {
        match self.quotes.get(quote) {
            Some(q) if !q.normalize_by_pair.is_empty() => Ok(Some(
                q.normalize_by_pair
                    .parse()
                    .with_context(|| format!("invalid normalize_by_pair for quote {quote}"))?,
            )),
            _ => Ok(None),
        }
    }

    /// Provider minimum implied by provider kinds: DEX-only markets use the DEX minimum
    pub fn kind_min_provider_count(&self, providers: &[ProviderConfig]) -> u64 {
        let mut counted = providers
            .iter()
            .filter(|pc| !self.is_supplemental(&pc.name))
            .peekable();
        let all_dex = counted.peek().is_some()
            && counted.all(|pc| self.provider(&pc.name).map(|p| p.is_dex).unwrap_or(false));
        if all_dex {
            self.min_dex_provider_count.max(1)
        } else {
            self.min_cex_provider_count.max(1)
        }
    }

    /// Config loaders may fold key case; symbols and tickers are upper case
    fn normalize_keys(&mut self) {
        self.quotes = std::mem::take(&mut self.quotes)
            .into_iter()
            .map(|(k, v)| (k.to_uppercase(), v))
            .collect();
        self.excluded_currency_pairs = std::mem::take(&mut self.excluded_currency_pairs)
            .into_iter()
            .map(|k| k.to_uppercase())
            .collect();
        self.allowed_currency_pairs = std::mem::take(&mut self.allowed_currency_pairs)
            .into_iter()
            .map(|k| k.to_uppercase())
            .collect();
        self.disable_providers = std::mem::take(&mut self.disable_providers)
            .into_iter()
            .map(|(k, v)| (k.to_uppercase(), v))
            .collect();
        self.market_map_override = MarketMap::from_markets(
            std::mem::take(&mut self.market_map_override.markets).into_values(),
        );
    }

    pub fn validate(&self) -> Result<()> {
        if self.relaxed_min_volume_and_liquidity_factor <= 0.0 {
            bail!(
                "relaxed_min_volume_and_liquidity_factor must be positive, got {}",
                self.relaxed_min_volume_and_liquidity_factor
            );
        }
        for (quote, cfg) in &self.quotes {
            if cfg.min_provider_volume < 0.0 || cfg.min_provider_liquidity < 0.0 {
                bail!("quote {quote} has a negative threshold");
            }
            if let Some(pair) = self.normalize_pair_for(quote)? {
                if !self.quotes.contains_key(&pair.quote) {
                    bail!(
                        "quote {quote} normalizes by {pair}, but {} is not a configured quote",
                        pair.quote
                    );
                }
            }
        }
        for pair in self
            .excluded_currency_pairs
            .iter()
            .chain(self.allowed_currency_pairs.iter())
            .chain(self.disable_providers.keys())
        {
            pair.parse::<CurrencyPair>()
                .with_context(|| format!("invalid currency pair {pair} in generate config"))?;
        }
        self.market_map_override
            .validate()
            .context("invalid market_map_override")?;
        Ok(())
    }
}

impl Settings {
    /// Load configuration from files and environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let mut builder = Config::builder()
            .set_default("generate.relaxed_min_volume_and_liquidity_factor", 1.0)?
            .set_default("generate.min_cex_provider_count", 1)?
            .set_default("generate.min_dex_provider_count", 1)?
            .set_default("sniff.enabled", false)?
            .set_default("sniff.base_url", "https://tokensniffer.com/api/v2")?
            .set_default("sniff.timeout_secs", 30)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            // Override with environment variables (MMU__*)
            .add_source(
                Environment::with_prefix("MMU")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("Failed to build configuration")?;

        let mut settings: Settings = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        settings.generate.normalize_keys();
        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.generate.validate()?;
        if self.sniff.enabled && self.sniff.api_key.is_empty() {
            bail!("sniff.enabled requires sniff.api_key");
        }
        Ok(())
    }

    /// Summary of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "quotes={:?} providers={:?} enable_all={} sniff={} restricted={}",
            self.generate.quotes.keys().collect::<Vec<_>>(),
            self.generate.providers.keys().collect::<Vec<_>>(),
            self.generate.enable_all,
            self.sniff.enabled,
            self.upsert.restricted_markets.len()
        )
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config() -> GenerateConfig {
        let mut cfg = GenerateConfig::default();
        cfg.quotes.insert("USD".into(), QuoteConfig::default());
        cfg.quotes.insert(
            "USDT".into(),
            QuoteConfig {
                normalize_by_pair: "USDT/USD".into(),
                ..Default::default()
            },
        );
        cfg.providers.insert(
            "uniswap".into(),
            ProviderSettings {
                is_dex: true,
                ..Default::default()
            },
        );
        cfg.providers.insert("okx".into(), ProviderSettings::default());
        cfg.providers.insert(
            "supp".into(),
            ProviderSettings {
                is_supplemental: true,
                ..Default::default()
            },
        );
        cfg.min_cex_provider_count = 3;
        cfg.min_dex_provider_count = 1;
        cfg
    }

    #[test]
    fn test_validate_ok() {
        assert!(make_config().validate().is_ok());
    }

    #[test]
    fn test_normalize_pair_must_target_quote() {
        let mut cfg = make_config();
        cfg.quotes.get_mut("USDT").unwrap().normalize_by_pair = "USDT/EUR".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bad_relaxation_factor() {
        let mut cfg = make_config();
        cfg.relaxed_min_volume_and_liquidity_factor = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_kind_min_provider_count() {
        let cfg = make_config();
        let dex_only = vec![
            ProviderConfig::new("uniswap", "X"),
            ProviderConfig::new("supp", "X"),
        ];
        assert_eq!(cfg.kind_min_provider_count(&dex_only), 1);

        let mixed = vec![
            ProviderConfig::new("uniswap", "X"),
            ProviderConfig::new("okx", "X"),
        ];
        assert_eq!(cfg.kind_min_provider_count(&mixed), 3);
    }

    #[test]
    fn test_normalize_keys_uppercases() {
        let mut cfg = GenerateConfig::default();
        cfg.quotes.insert("usd".into(), QuoteConfig::default());
        cfg.excluded_currency_pairs.insert("btc/usd".into());
        cfg.normalize_keys();
        assert!(cfg.is_target_quote("USD"));
        assert!(cfg.excluded_currency_pairs.contains("BTC/USD"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mmu.json");
        std::fs::write(
            &path,
            r#"{
                "generate": {
                    "quotes": {"USD": {"min_provider_liquidity": 100.0}},
                    "providers": {"okx_ws": {"is_supplemental": false}},
                    "enable_all": true
                },
                "upsert": {"restricted_markets": ["BTC/USD"]}
            }"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert!(settings.generate.enable_all);
        assert!(settings.generate.is_target_quote("USD"));
        assert_eq!(settings.upsert.restricted_markets, vec!["BTC/USD".to_string()]);
        assert_eq!(settings.generate.relaxed_min_volume_and_liquidity_factor, 1.0);
    }
}
