//! Core types used throughout the market-map pipeline
//!
//! Currency pairs, tickers, provider configs and markets, plus the typed
//! views of the JSON blobs carried in their metadata.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::MmuError;

/// Upper bound accepted for ticker decimals
pub const MAX_DECIMALS: u64 = 36;

/// Venue name for CoinMarketCap aggregate ids
pub const CMC_VENUE: &str = "coinmarketcap";

/// Ordered (base, quote) pair, rendered as `BASE/QUOTE`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyPair {
    #[serde(rename = "Base")]
    pub base: String,
    #[serde(rename = "Quote")]
    pub quote: String,
}

impl CurrencyPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// Swap base and quote
    pub fn invert(&self) -> Self {
        Self {
            base: self.quote.clone(),
            quote: self.base.clone(),
        }
    }

    /// DeFi pairs encode venue and contract in the base, e.g. `FOO,UNISWAP,0XAB/USD`
    pub fn is_defi(&self) -> bool {
        self.base.contains(',')
    }

    /// The `BASE/USD` pair for this pair's base asset
    pub fn base_usd(&self) -> Self {
        Self {
            base: self.base.clone(),
            quote: "USD".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), MmuError> {
        if self.base.is_empty() || self.quote.is_empty() {
            return Err(MmuError::validation(format!(
                "currency pair {self} has an empty asset"
            )));
        }
        if self.base.contains('/') || self.quote.contains('/') {
            return Err(MmuError::validation(format!(
                "currency pair {self} contains a separator inside an asset"
            )));
        }
        if self.base == self.quote {
            return Err(MmuError::validation(format!(
                "currency pair {self} has identical base and quote"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for CurrencyPair {
    type Err = MmuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) => {
                let pair = CurrencyPair::new(base.trim(), quote.trim());
                pair.validate()?;
                Ok(pair)
            }
            _ => Err(MmuError::validation(format!(
                "invalid currency pair {s:?}, expected BASE/QUOTE"
            ))),
        }
    }
}

/// Ticker-level fields of a market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub currency_pair: CurrencyPair,
    #[serde(deserialize_with = "u64_lenient")]
    pub decimals: u64,
    #[serde(deserialize_with = "u64_lenient")]
    pub min_provider_count: u64,
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "metadata_JSON", default)]
    pub metadata_json: String,
}

impl Ticker {
    pub fn new(currency_pair: CurrencyPair, decimals: u64, min_provider_count: u64) -> Self {
        Self {
            currency_pair,
            decimals,
            min_provider_count,
            enabled: false,
            metadata_json: String::new(),
        }
    }

    /// Decoded metadata, `None` when the blob is empty
    pub fn metadata(&self) -> Result<Option<TickerMetadata>, MmuError> {
        TickerMetadata::from_json(&self.metadata_json)
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.currency_pair)
    }
}

/// One data source's contribution to a market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub off_chain_ticker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalize_by_pair: Option<CurrencyPair>,
    #[serde(default)]
    pub invert: bool,
    #[serde(rename = "metadata_JSON", default)]
    pub metadata_json: String,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, off_chain_ticker: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            off_chain_ticker: off_chain_ticker.into(),
            normalize_by_pair: None,
            invert: false,
            metadata_json: String::new(),
        }
    }
}

/// Ticker plus its ordered provider configs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub ticker: Ticker,
    #[serde(default)]
    pub provider_configs: Vec<ProviderConfig>,
}

impl Market {
    pub fn new(ticker: Ticker, provider_configs: Vec<ProviderConfig>) -> Self {
        Self {
            ticker,
            provider_configs,
        }
    }

    /// Ticker string used as the market-map key
    pub fn key(&self) -> String {
        self.ticker.currency_pair.to_string()
    }

    pub fn is_enabled(&self) -> bool {
        self.ticker.enabled
    }

    /// Distinct normalize-by pairs referenced by this market's providers
    pub fn normalize_by_pairs(&self) -> Vec<CurrencyPair> {
        let mut pairs: Vec<CurrencyPair> = Vec::new();
        for pc in &self.provider_configs {
            if let Some(pair) = &pc.normalize_by_pair {
                if !pairs.contains(pair) {
                    pairs.push(pair.clone());
                }
            }
        }
        pairs
    }

    pub fn has_provider(&self, name: &str) -> bool {
        self.provider_configs.iter().any(|pc| pc.name == name)
    }

    /// Checks the market in isolation; cross-market references are checked by `MarketMap`
    pub fn validate(&self) -> Result<(), MmuError> {
        let key = self.key();
        self.ticker.currency_pair.validate()?;

        if self.ticker.decimals > MAX_DECIMALS {
            return Err(MmuError::validation(format!(
                "{key}: decimals {} exceeds {MAX_DECIMALS}",
                self.ticker.decimals
            )));
        }
        if self.ticker.min_provider_count == 0 {
            return Err(MmuError::validation(format!(
                "{key}: min_provider_count must be at least 1"
            )));
        }
        if self.provider_configs.is_empty() {
            return Err(MmuError::validation(format!("{key}: no provider configs")));
        }
        if (self.provider_configs.len() as u64) < self.ticker.min_provider_count {
            return Err(MmuError::validation(format!(
                "{key}: {} provider(s) is below min_provider_count {}",
                self.provider_configs.len(),
                self.ticker.min_provider_count
            )));
        }

        let mut seen = HashSet::new();
        for pc in &self.provider_configs {
            if pc.name.is_empty() || pc.off_chain_ticker.is_empty() {
                return Err(MmuError::validation(format!(
                    "{key}: provider config with empty name or off-chain ticker"
                )));
            }
            if !seen.insert(pc.name.as_str()) {
                return Err(MmuError::validation(format!(
                    "{key}: duplicate provider {}",
                    pc.name
                )));
            }
            if let Some(pair) = &pc.normalize_by_pair {
                pair.validate()?;
                if *pair == self.ticker.currency_pair {
                    return Err(MmuError::validation(format!(
                        "{key}: provider {} normalizes by its own market",
                        pc.name
                    )));
                }
            }
        }

        self.ticker.metadata().map(|_| ())
    }
}

/// External aggregator identifier for an asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateId {
    pub venue: String,
    #[serde(rename = "ID")]
    pub id: String,
}

/// Typed contents of `Ticker::metadata_json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickerMetadata {
    #[serde(default)]
    pub reference_price: Decimal,
    #[serde(default)]
    pub liquidity: Decimal,
    #[serde(default)]
    pub aggregate_ids: Vec<AggregateId>,
}

impl TickerMetadata {
    pub fn from_json(raw: &str) -> Result<Option<Self>, MmuError> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| MmuError::validation(format!("invalid ticker metadata: {e}")))
    }

    pub fn to_json(&self) -> Result<String, MmuError> {
        Ok(serde_json::to_string(self)?)
    }

    /// First aggregate id, which is the CMC id for generated markets
    pub fn primary_id(&self) -> Option<&str> {
        self.aggregate_ids.first().map(|a| a.id.as_str())
    }

    pub fn id_for_venue(&self, venue: &str) -> Option<&str> {
        self.aggregate_ids
            .iter()
            .find(|a| a.venue == venue)
            .map(|a| a.id.as_str())
    }
}

/// Asset-level classification record, keyed by CMC id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub id: i64,
    pub symbol: String,
    pub cmc_id: i64,
    #[serde(default)]
    pub rank: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    /// `[chain, contract address]` entries
    #[serde(default)]
    pub multi_addresses: Vec<[String; 2]>,
}

/// Accept integers encoded either as JSON numbers or strings
fn u64_lenient<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
