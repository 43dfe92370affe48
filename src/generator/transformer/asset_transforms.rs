//! Asset transforms
//!
//! Filters applied once feeds carry their base asset's tags and contract
//! addresses.

use anyhow::Result;
use futures_util::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::config::{GenerateConfig, SniffConfig};
use crate::generator::feed::{ExclusionReasons, Feed};
use crate::sniff::{screen_addresses, ScamScreener};
use crate::types::AssetInfo;

/// CMC id -> asset info
pub type AssetInfos = BTreeMap<i64, AssetInfo>;

/// Copy tags and addresses of each feed's base asset onto the feed
pub fn enrich_feeds(feeds: Vec<Feed>, infos: &AssetInfos) -> Vec<Feed> {
    feeds
        .into_iter()
        .map(|mut feed| {
            if let Some(info) = infos.get(&feed.cmc.base_id) {
                feed.tags = info.tags.clone();
                feed.multi_addresses = info.multi_addresses.clone();
            }
            feed
        })
        .collect()
}

/// Drop feeds whose base asset carries an excluded CMC tag
pub fn filter_out_cmc_tags(
    cfg: &GenerateConfig,
    feeds: Vec<Feed>,
) -> Result<(Vec<Feed>, ExclusionReasons)> {
    info!(feeds = feeds.len(), tags = ?cfg.exclude_cmc_tags, "filtering out CMC tags");

    let mut out = Vec::with_capacity(feeds.len());
    let mut exclusions = ExclusionReasons::new();
    for feed in feeds {
        let matched: Vec<&str> = feed
            .tags
            .iter()
            .filter(|tag| cfg.exclude_cmc_tags.contains(*tag))
            .map(String::as_str)
            .collect();
        if matched.is_empty() {
            out.push(feed);
            continue;
        }
        exclusions.add_feed(
            &feed,
            format!("FilterOutCMCTags: has CMC tags to exclude {}", matched.join(", ")),
        );
    }

    info!(remaining = out.len(), "filtered out CMC tags");
    Ok((out, exclusions))
}

/// Drop feeds whose base asset is on the CMC id deny list
pub fn filter_out_cmc_ids(
    cfg: &GenerateConfig,
    feeds: Vec<Feed>,
) -> Result<(Vec<Feed>, ExclusionReasons)> {
    let mut out = Vec::with_capacity(feeds.len());
    let mut exclusions = ExclusionReasons::new();
    for feed in feeds {
        if cfg.exclude_cmc_ids.contains(&feed.cmc.base_id) {
            exclusions.add_feed(&feed, "FilterOutCMCID: has cmc id to exclude");
        } else {
            out.push(feed);
        }
    }

    info!(remaining = out.len(), "filtered out CMC ids");
    Ok((out, exclusions))
}

/// Drop feeds whose base contract is reported as a scam.
///
/// Each asset's `[chain, address]` entries are tried in order until one
/// answers. Assets sharing the same entries are screened once. An asset whose
/// every check fails is kept.
pub async fn sniff_out_scam_tokens(
    cfg: &SniffConfig,
    feeds: Vec<Feed>,
    screener: &dyn ScamScreener,
) -> Result<(Vec<Feed>, ExclusionReasons)> {
    info!(feeds = feeds.len(), "sniffing assets");

    let screened = |feed: &Feed| !cfg.whitelist.contains(&feed.cmc.base_id) && !feed.multi_addresses.is_empty();

    let targets: BTreeSet<&Vec<[String; 2]>> = feeds
        .iter()
        .filter(|f| screened(*f))
        .map(|f| &f.multi_addresses)
        .collect();

    let verdicts = join_all(targets.into_iter().map(|addresses| async move {
        let verdict = screen_addresses(screener, addresses).await;
        if verdict.is_none() {
            warn!(chains = addresses.len(), "every scam check failed, keeping token");
        }
        (addresses.clone(), verdict)
    }))
    .await;
    let verdicts: BTreeMap<Vec<[String; 2]>, Option<([String; 2], bool)>> = verdicts.into_iter().collect();

    let mut out = Vec::with_capacity(feeds.len());
    let mut exclusions = ExclusionReasons::new();
    for feed in feeds {
        let flagged = if screened(&feed) {
            match verdicts.get(&feed.multi_addresses) {
                Some(Some(([_, address], true))) => Some(address.clone()),
                _ => None,
            }
        } else {
            None
        };

        let Some(address) = flagged else {
            out.push(feed);
            continue;
        };

        info!(ticker = %feed.pair, address = %address, "filtering out scam token");
        let reason = format!(
            "Filtering out scam token: ID: {} | Address: {} | Symbol: {}",
            feed.cmc.base_id, address, feed.pair.base
        );
        exclusions.add_feed(&feed, reason);
    }

    info!(remaining = out.len(), screened = verdicts.len(), "filtered scam tokens");
    Ok((out, exclusions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::feed::CmcInfo;
    use crate::sniff::MockScamScreener;
    use crate::types::ProviderConfig;
    use anyhow::anyhow;
    use rust_decimal::Decimal;

    fn make_feed(pair: &str, base_id: i64) -> Feed {
        let mut feed = Feed::new(
            pair.parse().unwrap(),
            ProviderConfig::new("okx", pair.replace('/', "-")),
            Decimal::ONE,
        );
        feed.cmc = CmcInfo {
            base_id,
            quote_id: 1,
            base_rank: 1,
            quote_rank: 1,
        };
        feed
    }

    fn make_infos() -> AssetInfos {
        let mut infos = AssetInfos::new();
        infos.insert(
            10,
            AssetInfo {
                id: 1,
                symbol: "MEME".into(),
                cmc_id: 10,
                tags: vec!["memes".into(), "Solana Ecosystem".into()],
                multi_addresses: vec![
                    ["Ethereum".into(), "0xmeme".into()],
                    ["Base".into(), "0xbase".into()],
                ],
                ..Default::default()
            },
        );
        infos.insert(
            20,
            AssetInfo {
                id: 2,
                symbol: "GOOD".into(),
                cmc_id: 20,
                tags: vec!["Memes".into()],
                multi_addresses: vec![["Ethereum".into(), "0xgood".into()]],
                ..Default::default()
            },
        );
        infos
    }

    #[test]
    fn test_filter_out_cmc_tags_exact_case() {
        let mut cfg = GenerateConfig::default();
        cfg.exclude_cmc_tags = vec!["memes".into(), "Solana Ecosystem".into()];
        let feeds = enrich_feeds(vec![make_feed("MEME/USD", 10), make_feed("GOOD/USD", 20)], &make_infos());

        let (out, excl) = filter_out_cmc_tags(&cfg, feeds).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pair.base, "GOOD", "tag match is case-sensitive");
        assert_eq!(
            excl.get("MEME/USD").unwrap()[0].reason,
            "FilterOutCMCTags: has CMC tags to exclude memes, Solana Ecosystem"
        );
    }

    #[test]
    fn test_filter_out_cmc_ids() {
        let mut cfg = GenerateConfig::default();
        cfg.exclude_cmc_ids.insert(20);
        let (out, excl) =
            filter_out_cmc_ids(&cfg, vec![make_feed("MEME/USD", 10), make_feed("GOOD/USD", 20)]).unwrap();
        assert_eq!(out.len(), 1);
        assert!(excl.contains("GOOD/USD"));
    }

    #[tokio::test]
    async fn test_sniff_excludes_scam_and_dedups() {
        let mut screener = MockScamScreener::new();
        screener
            .expect_is_scam()
            .withf(|chain, address| chain == "Ethereum" && address == "0xmeme")
            .times(1)
            .returning(|_, _| Ok(true));
        screener
            .expect_is_scam()
            .withf(|_, address| address == "0xgood")
            .times(1)
            .returning(|_, _| Ok(false));

        let feeds = enrich_feeds(
            vec![make_feed("MEME/USD", 10), make_feed("MEME/ETH", 10), make_feed("GOOD/USD", 20)],
            &make_infos(),
        );
        let (out, excl) = sniff_out_scam_tokens(&SniffConfig::default(), feeds, &screener)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(
            excl.get("MEME/USD").unwrap()[0].reason,
            "Filtering out scam token: ID: 10 | Address: 0xmeme | Symbol: MEME"
        );
        assert!(excl.contains("MEME/ETH"));
    }

    #[tokio::test]
    async fn test_sniff_falls_back_to_next_chain() {
        let mut screener = MockScamScreener::new();
        screener
            .expect_is_scam()
            .withf(|chain, _| chain == "Ethereum")
            .times(1)
            .returning(|_, _| Err(anyhow!("timeout")));
        screener
            .expect_is_scam()
            .withf(|chain, address| chain == "Base" && address == "0xbase")
            .times(1)
            .returning(|_, _| Ok(true));

        let feeds = enrich_feeds(vec![make_feed("MEME/USD", 10)], &make_infos());
        let (out, excl) = sniff_out_scam_tokens(&SniffConfig::default(), feeds, &screener)
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(
            excl.get("MEME/USD").unwrap()[0].reason,
            "Filtering out scam token: ID: 10 | Address: 0xbase | Symbol: MEME"
        );
    }

    #[tokio::test]
    async fn test_sniff_fails_open_when_every_chain_errors() {
        let mut screener = MockScamScreener::new();
        screener
            .expect_is_scam()
            .times(2)
            .returning(|_, _| Err(anyhow!("service down")));

        let feeds = enrich_feeds(vec![make_feed("MEME/USD", 10)], &make_infos());
        let (out, excl) = sniff_out_scam_tokens(&SniffConfig::default(), feeds, &screener)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(excl.is_empty());
    }

    #[tokio::test]
    async fn test_sniff_skips_whitelist_and_unknown_assets() {
        let mut screener = MockScamScreener::new();
        screener
            .expect_is_scam()
            .withf(|_, address| address == "0xgood")
            .times(1)
            .returning(|_, _| Err(anyhow!("service down")));

        let mut cfg = SniffConfig::default();
        cfg.whitelist.insert(10);
        let feeds = enrich_feeds(
            vec![make_feed("MEME/USD", 10), make_feed("GOOD/USD", 20), make_feed("NONE/USD", 30)],
            &make_infos(),
        );
        let (out, excl) = sniff_out_scam_tokens(&cfg, feeds, &screener).await.unwrap();
        assert_eq!(out.len(), 3);
        assert!(excl.is_empty());
    }
}
