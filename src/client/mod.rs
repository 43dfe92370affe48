//! Market map sources
//!
//! Reads the on-chain market map either from a JSON file or from the chain's
//! REST API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT},
    Client,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::MmuError;
use crate::marketmap::MarketMap;
use crate::retry::{with_retry, RetrySchedule};
use crate::types::Market;

pub const MARKET_MAP_PATH: &str = "/connect/marketmap/v2/marketmap";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketMapSource: Send + Sync {
    async fn market_map(&self) -> Result<MarketMap>;
}

/// Accepted shapes: `{"market_map": {"markets": {..}}}`, `{"markets": {..}}`
/// or a bare ticker map
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MarketMapDocument {
    Wrapped { market_map: MarketMap },
    Plain { markets: BTreeMap<String, Market> },
    Bare(BTreeMap<String, Market>),
}

impl MarketMapDocument {
    fn into_market_map(self) -> MarketMap {
        match self {
            Self::Wrapped { market_map } => MarketMap::from_markets(market_map.markets.into_values()),
            Self::Plain { markets } | Self::Bare(markets) => MarketMap::from_markets(markets.into_values()),
        }
    }
}

pub fn parse_market_map(raw: &str) -> Result<MarketMap> {
    let doc: MarketMapDocument = serde_json::from_str(raw).context("Failed to decode market map")?;
    Ok(doc.into_market_map())
}

pub struct FileMarketMapSource {
    path: PathBuf,
}

impl FileMarketMapSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MarketMapSource for FileMarketMapSource {
    async fn market_map(&self) -> Result<MarketMap> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read market map {}", self.path.display()))?;
        let mm = parse_market_map(&raw)
            .with_context(|| format!("Failed to parse market map {}", self.path.display()))?;
        info!(path = %self.path.display(), markets = mm.len(), "loaded market map");
        Ok(mm)
    }
}

/// Chain REST API client
pub struct RestMarketMapSource {
    client: Client,
    base_url: String,
    schedule: RetrySchedule,
}

impl RestMarketMapSource {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            schedule: RetrySchedule::default(),
        })
    }

    pub fn with_schedule(mut self, schedule: RetrySchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.base_url, MARKET_MAP_PATH)
    }

    async fn fetch(&self) -> Result<MarketMap> {
        let resp = self
            .client
            .get(self.url())
            .send()
            .await
            .context("market map request failed")?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MmuError::External(format!("market map request returned {status}")).into());
        }

        let raw = resp.text().await.context("Failed to read market map response")?;
        parse_market_map(&raw)
    }
}

#[async_trait]
impl MarketMapSource for RestMarketMapSource {
    async fn market_map(&self) -> Result<MarketMap> {
        let mm = with_retry(
            "market_map",
            &self.schedule,
            |attempt, err| warn!(attempt, url = %self.url(), error = %err, "market map query failed, retrying"),
            || self.fetch(),
        )
        .await?;
        info!(url = %self.url(), markets = mm.len(), "queried market map");
        Ok(mm)
    }
}
