//! Scam screening for token contracts
//!
//! `ScamScreener` is the seam used by generation and upserts; `TokenSniffer`
//! is the HTTP implementation.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::config::SniffConfig;
use crate::error::MmuError;
use crate::retry::{with_retry, RetrySchedule};

/// Reputation score below which a token is treated as a scam
pub const MIN_SAFE_SCORE: f64 = 30.0;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScamScreener: Send + Sync {
    /// True when the contract on `chain` is flagged as a scam
    async fn is_scam(&self, chain: &str, address: &str) -> Result<bool>;
}

/// Chain name as reported by CMC -> numeric chain id used by the service
pub fn chain_id(chain: &str) -> Option<u64> {
    let id = match chain {
        "Ethereum" => 1,
        "Solana" => 101,
        "Base" => 8453,
        "BNB Smart Chain (BEP20)" => 56,
        "Polygon" => 137,
        "Arbitrum" => 42161,
        "Optimism" => 10,
        "Avalanche C-Chain" => 43114,
        "Fantom" => 250,
        "Gnosis Chain" => 100,
        "Harmony" => 1666600000,
        "KCC" => 321,
        "Cronos" => 25,
        "Oasis Network" => 42262,
        _ => return None,
    };
    Some(id)
}

/// Verdict for an asset's `[chain, address]` entries.
///
/// Entries are tried in order and the first successful answer decides,
/// returned with the entry that produced it. Failed entries are logged and
/// skipped. `None` when every entry fails.
pub async fn screen_addresses(
    screener: &dyn ScamScreener,
    addresses: &[[String; 2]],
) -> Option<([String; 2], bool)> {
    for entry in addresses {
        let [chain, address] = entry;
        match screener.is_scam(chain, address).await {
            Ok(scam) => return Some((entry.clone(), scam)),
            Err(e) => {
                warn!(chain = %chain, address = %address, error = %e, "failed to check if token is a scam");
            }
        }
    }
    None
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapSimulation {
    #[serde(default = "default_sellable")]
    pub is_sellable: bool,
}

fn default_sellable() -> bool {
    true
}

/// Fields of the token report that decide the verdict
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSnifferResponse {
    pub is_flagged: bool,
    pub is_suspect: bool,
    pub score: f64,
    #[serde(default)]
    pub swap_simulation: Option<SwapSimulation>,
}

impl TokenSnifferResponse {
    pub fn is_scam(&self) -> bool {
        let sellable = self
            .swap_simulation
            .as_ref()
            .map(|s| s.is_sellable)
            .unwrap_or(true);
        self.is_flagged || self.is_suspect || self.score < MIN_SAFE_SCORE || !sellable
    }
}

/// TokenSniffer REST client
pub struct TokenSniffer {
    client: Client,
    base_url: String,
    api_key: String,
    schedule: RetrySchedule,
}

impl TokenSniffer {
    pub fn new(config: &SniffConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            schedule: RetrySchedule::default(),
        })
    }

    pub fn with_schedule(mut self, schedule: RetrySchedule) -> Self {
        self.schedule = schedule;
        self
    }

    fn token_url(&self, chain_id: u64, address: &str) -> String {
        format!(
            "{}/tokens/{}/{}?apikey={}&include_metrics=true",
            self.base_url, chain_id, address, self.api_key
        )
    }

    async fn fetch(&self, chain_id: u64, address: &str) -> Result<TokenSnifferResponse> {
        let resp = self
            .client
            .get(self.token_url(chain_id, address))
            .send()
            .await
            .context("token report request failed")?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MmuError::External(format!(
                "failed to check if token is a scam: {status}"
            ))
            .into());
        }

        resp.json::<TokenSnifferResponse>()
            .await
            .context("Failed to parse token report")
    }
}

#[async_trait]
impl ScamScreener for TokenSniffer {
    async fn is_scam(&self, chain: &str, address: &str) -> Result<bool> {
        let Some(id) = chain_id(chain) else {
            bail!(MmuError::External(format!("unsupported chain {chain}")));
        };

        let report = with_retry(
            "token_sniffer",
            &self.schedule,
            |attempt, err| warn!(attempt, chain = %chain, address = %address, error = %err, "token report failed, retrying"),
            || self.fetch(id, address),
        )
        .await?;

        Ok(report.is_scam())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_response(raw: &str) -> TokenSnifferResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_verdicts() {
        let clean = make_response(
            r#"{"is_flagged":false,"is_suspect":false,"score":85,"swap_simulation":{"is_sellable":true}}"#,
        );
        assert!(!clean.is_scam());

        let flagged = make_response(r#"{"is_flagged":true,"is_suspect":false,"score":85}"#);
        assert!(flagged.is_scam());

        let low_score = make_response(r#"{"is_flagged":false,"is_suspect":false,"score":29.9}"#);
        assert!(low_score.is_scam());

        let honeypot = make_response(
            r#"{"is_flagged":false,"is_suspect":false,"score":90,"swap_simulation":{"is_sellable":false}}"#,
        );
        assert!(honeypot.is_scam());
    }

    #[test]
    fn test_missing_required_field_is_error() {
        let parsed: Result<TokenSnifferResponse, _> =
            serde_json::from_str(r#"{"is_flagged":false,"score":85}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_chain_ids() {
        assert_eq!(chain_id("Ethereum"), Some(1));
        assert_eq!(chain_id("BNB Smart Chain (BEP20)"), Some(56));
        assert_eq!(chain_id("Dogechain"), None);
    }

    #[test]
    fn test_token_url() {
        let cfg = SniffConfig {
            api_key: "k".into(),
            base_url: "https://tokensniffer.com/api/v2/".into(),
            ..Default::default()
        };
        let sniffer = TokenSniffer::new(&cfg).unwrap();
        assert_eq!(
            sniffer.token_url(1, "0xabc"),
            "https://tokensniffer.com/api/v2/tokens/1/0xabc?apikey=k&include_metrics=true"
        );
    }

    fn entries(raw: &[(&str, &str)]) -> Vec<[String; 2]> {
        raw.iter().map(|(c, a)| [c.to_string(), a.to_string()]).collect()
    }

    #[tokio::test]
    async fn test_screen_addresses_falls_through_failed_chains() {
        let mut screener = MockScamScreener::new();
        screener
            .expect_is_scam()
            .withf(|chain, _| chain == "Sui")
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("unsupported chain Sui")));
        screener
            .expect_is_scam()
            .withf(|chain, address| chain == "Ethereum" && address == "0xrug")
            .times(1)
            .returning(|_, _| Ok(true));

        let addresses = entries(&[("Sui", "0x2::rug"), ("Ethereum", "0xrug"), ("Base", "0xrug")]);
        let verdict = screen_addresses(&screener, &addresses).await;
        assert_eq!(verdict, Some((["Ethereum".to_string(), "0xrug".to_string()], true)));
    }

    #[tokio::test]
    async fn test_screen_addresses_stops_at_first_answer() {
        let mut screener = MockScamScreener::new();
        screener
            .expect_is_scam()
            .withf(|chain, _| chain == "Ethereum")
            .times(1)
            .returning(|_, _| Ok(false));

        let addresses = entries(&[("Ethereum", "0xok"), ("Base", "0xok")]);
        let verdict = screen_addresses(&screener, &addresses).await;
        assert_eq!(verdict.map(|(_, scam)| scam), Some(false));
    }

    #[tokio::test]
    async fn test_screen_addresses_all_failed() {
        let mut screener = MockScamScreener::new();
        screener
            .expect_is_scam()
            .times(2)
            .returning(|_, _| Err(anyhow::anyhow!("service down")));

        let addresses = entries(&[("Ethereum", "0xa"), ("Base", "0xb")]);
        assert_eq!(screen_addresses(&screener, &addresses).await, None);
        assert_eq!(screen_addresses(&screener, &[]).await, None);
    }

    #[tokio::test]
    async fn test_unsupported_chain_is_error() {
        let sniffer = TokenSniffer::new(&SniffConfig::default()).unwrap();
        assert!(sniffer.is_scam("Dogechain", "0xabc").await.is_err());
    }
}
