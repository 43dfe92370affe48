//! Feeds - one provider's quote for one currency pair
//!
//! Also holds exclusion bookkeeping and the assembly of surviving feeds
//! into a market map.

use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::config::GenerateConfig;
use crate::marketmap::MarketMap;
use crate::types::{
    AggregateId, CurrencyPair, Market, ProviderConfig, Ticker, TickerMetadata, CMC_VENUE,
    MAX_DECIMALS,
};

/// Decimals for a market priced at or above 1
const BASE_DECIMALS: u64 = 8;

/// CMC identifiers and ranks for both legs of a pair; rank 0 means unranked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmcInfo {
    pub base_id: i64,
    pub quote_id: i64,
    pub base_rank: i64,
    pub quote_rank: i64,
}

impl CmcInfo {
    pub fn has_rank(&self) -> bool {
        self.base_rank > 0 && self.quote_rank > 0
    }

    pub fn invert(&self) -> Self {
        Self {
            base_id: self.quote_id,
            quote_id: self.base_id,
            base_rank: self.quote_rank,
            quote_rank: self.base_rank,
        }
    }

    /// Groups same-symbol feeds that refer to the same underlying assets
    pub fn unique_id(&self) -> String {
        format!("{}-{}", self.base_id, self.quote_id)
    }

    /// Unranked sorts after every ranked asset
    pub fn effective_base_rank(&self) -> i64 {
        effective_rank(self.base_rank)
    }

    pub fn effective_quote_rank(&self) -> i64 {
        effective_rank(self.quote_rank)
    }
}

fn effective_rank(rank: i64) -> i64 {
    if rank <= 0 {
        i64::MAX
    } else {
        rank
    }
}

/// Order book depth within +/-2% of mid, in USD
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LiquidityInfo {
    pub negative_depth_two: f64,
    pub positive_depth_two: f64,
}

impl LiquidityInfo {
    pub fn is_sufficient(&self, min: f64) -> bool {
        self.negative_depth_two >= min && self.positive_depth_two >= min
    }

    pub fn total(&self) -> f64 {
        self.negative_depth_two + self.positive_depth_two
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub pair: CurrencyPair,
    pub provider_config: ProviderConfig,
    pub reference_price: Decimal,
    pub daily_quote_volume: f64,
    pub daily_usd_volume: f64,
    pub liquidity: Option<LiquidityInfo>,
    pub cmc: CmcInfo,
    /// Base asset tags, filled before asset transforms
    #[serde(default)]
    pub tags: Vec<String>,
    /// Base asset `[chain, address]` entries, filled before asset transforms
    #[serde(default)]
    pub multi_addresses: Vec<[String; 2]>,
}

impl Feed {
    pub fn new(pair: CurrencyPair, provider_config: ProviderConfig, reference_price: Decimal) -> Self {
        Self {
            pair,
            provider_config,
            reference_price,
            daily_quote_volume: 0.0,
            daily_usd_volume: 0.0,
            liquidity: None,
            cmc: CmcInfo::default(),
            tags: Vec::new(),
            multi_addresses: Vec::new(),
        }
    }

    pub fn ticker_string(&self) -> String {
        self.pair.to_string()
    }

    pub fn provider(&self) -> &str {
        &self.provider_config.name
    }

    /// Key used to detect one provider quoting the same ticker twice
    pub fn provider_ticker(&self) -> String {
        format!("{}_{}", self.provider_config.name, self.pair)
    }

    fn total_liquidity(&self) -> f64 {
        self.liquidity.map(|l| l.total()).unwrap_or(0.0)
    }

    /// True when `self` should replace `incumbent`: more liquidity, then more volume
    pub fn is_better_than(&self, incumbent: &Feed) -> bool {
        match self
            .total_liquidity()
            .partial_cmp(&incumbent.total_liquidity())
        {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => self.daily_usd_volume > incumbent.daily_usd_volume,
            _ => false,
        }
    }

    fn sort_key(&self) -> (i64, i64, String, &str, &str) {
        (
            self.cmc.effective_base_rank(),
            self.cmc.effective_quote_rank(),
            self.ticker_string(),
            self.provider_config.name.as_str(),
            self.provider_config.off_chain_ticker.as_str(),
        )
    }
}

/// Sort best-ranked first; ties fall back to ticker and provider
pub fn sort_feeds(feeds: &mut [Feed]) {
    feeds.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// Average reference price per pair string
pub fn average_prices(feeds: &[Feed]) -> BTreeMap<String, Decimal> {
    let mut sums: BTreeMap<String, (Decimal, u32)> = BTreeMap::new();
    for feed in feeds {
        let entry = sums.entry(feed.ticker_string()).or_insert((Decimal::ZERO, 0));
        entry.0 += feed.reference_price;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(pair, (sum, count))| (pair, sum / Decimal::from(count)))
        .collect()
}

/// Decimals needed to show a price with 8 significant digits
pub fn decimals_for_price(price: Decimal) -> u64 {
    if price <= Decimal::ZERO || price >= Decimal::ONE {
        return BASE_DECIMALS;
    }
    let mut scaled = price;
    let mut leading_zeros = 0u64;
    while scaled < Decimal::ONE / Decimal::TEN && leading_zeros < MAX_DECIMALS {
        scaled *= Decimal::TEN;
        leading_zeros += 1;
    }
    (BASE_DECIMALS + leading_zeros).min(MAX_DECIMALS)
}

/// Group feeds by ticker into disabled candidate markets
pub fn to_market_map(feeds: &[Feed], cfg: &GenerateConfig) -> Result<MarketMap> {
    let mut sorted = feeds.to_vec();
    sort_feeds(&mut sorted);

    let averages = average_prices(&sorted);
    let mut grouped: BTreeMap<String, Vec<&Feed>> = BTreeMap::new();
    for feed in &sorted {
        grouped.entry(feed.ticker_string()).or_default().push(feed);
    }

    let mut mm = MarketMap::new();
    for (ticker, group) in grouped {
        let mut providers: Vec<ProviderConfig> = Vec::with_capacity(group.len());
        for feed in &group {
            if !providers.iter().any(|pc| pc.name == feed.provider_config.name) {
                providers.push(feed.provider_config.clone());
            }
        }

        let reference_price = averages.get(&ticker).copied().unwrap_or_default();
        let liquidity: f64 = group.iter().map(|f| f.total_liquidity()).sum();
        let base_id = group[0].cmc.base_id;
        let metadata = TickerMetadata {
            reference_price,
            liquidity: Decimal::from_f64_retain(liquidity)
                .unwrap_or_default()
                .round_dp(2),
            aggregate_ids: if base_id != 0 {
                vec![AggregateId {
                    venue: CMC_VENUE.to_string(),
                    id: base_id.to_string(),
                }]
            } else {
                Vec::new()
            },
        };

        let min_provider_count = cfg
            .kind_min_provider_count(&providers)
            .min(providers.len() as u64)
            .max(1);
        let mut t = Ticker::new(
            group[0].pair.clone(),
            decimals_for_price(reference_price),
            min_provider_count,
        );
        t.metadata_json = metadata.to_json()?;

        mm.insert(Market::new(t, providers));
    }

    Ok(mm)
}

/// Why one provider's contribution to a ticker was dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionReason {
    pub provider: String,
    pub reason: String,
}

/// Ticker -> reasons; merging appends, nothing is ever removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExclusionReasons(BTreeMap<String, Vec<ExclusionReason>>);

impl ExclusionReasons {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, ticker: impl Into<String>, provider: impl Into<String>, reason: impl Into<String>) {
        self.0.entry(ticker.into()).or_default().push(ExclusionReason {
            provider: provider.into(),
            reason: reason.into(),
        });
    }

    pub fn add_feed(&mut self, feed: &Feed, reason: impl Into<String>) {
        self.add(feed.ticker_string(), feed.provider(), reason);
    }

    /// One entry per provider of a dropped market
    pub fn add_market(&mut self, market: &Market, reason: impl Into<String>) {
        let reason = reason.into();
        if market.provider_configs.is_empty() {
            self.add(market.key(), "", reason);
            return;
        }
        for pc in &market.provider_configs {
            self.add(market.key(), pc.name.clone(), reason.clone());
        }
    }

    pub fn merge(&mut self, other: ExclusionReasons) {
        for (ticker, reasons) in other.0 {
            self.0.entry(ticker).or_default().extend(reasons);
        }
    }

    pub fn get(&self, ticker: &str) -> Option<&Vec<ExclusionReason>> {
        self.0.get(ticker)
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.0.contains_key(ticker)
    }

    /// Number of tickers with at least one reason
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<ExclusionReason>)> {
        self.0.iter()
    }
}
