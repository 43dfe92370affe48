//! Market map container and structural validation
//!
//! Markets are keyed by ticker string in a `BTreeMap`, so every iteration
//! over a map is in sorted ticker order.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::error::MmuError;
use crate::types::Market;

/// How to treat invalid markets in a loaded map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Any invalid market fails the load
    #[default]
    Strict,
    /// Warn and continue with the valid subset
    ValidSubset,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketMap {
    #[serde(default)]
    pub markets: BTreeMap<String, Market>,
}

impl MarketMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_markets(markets: impl IntoIterator<Item = Market>) -> Self {
        let mut mm = Self::new();
        for market in markets {
            mm.insert(market);
        }
        mm
    }

    /// Insert or replace a market under its own ticker string
    pub fn insert(&mut self, market: Market) -> Option<Market> {
        self.markets.insert(market.key(), market)
    }

    pub fn get(&self, ticker: &str) -> Option<&Market> {
        self.markets.get(ticker)
    }

    pub fn get_mut(&mut self, ticker: &str) -> Option<&mut Market> {
        self.markets.get_mut(ticker)
    }

    pub fn remove(&mut self, ticker: &str) -> Option<Market> {
        self.markets.remove(ticker)
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.markets.contains_key(ticker)
    }

    /// True when the ticker exists and is enabled
    pub fn is_enabled(&self, ticker: &str) -> bool {
        self.markets.get(ticker).map(|m| m.is_enabled()).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Market)> {
        self.markets.iter()
    }

    pub fn tickers(&self) -> Vec<String> {
        self.markets.keys().cloned().collect()
    }

    /// Copy of this map with each market upserted
    pub fn with_applied<'a>(&self, markets: impl IntoIterator<Item = &'a Market>) -> Self {
        let mut out = self.clone();
        for market in markets {
            out.insert(market.clone());
        }
        out
    }

    /// Every invalid ticker with the reason it failed
    pub fn invalid_markets(&self) -> BTreeMap<String, String> {
        let mut invalid = BTreeMap::new();

        for (key, market) in &self.markets {
            if *key != market.key() {
                invalid.insert(
                    key.clone(),
                    format!("key {key} does not match ticker {}", market.key()),
                );
                continue;
            }
            if let Err(e) = market.validate() {
                invalid.insert(key.clone(), e.to_string());
                continue;
            }
            for pair in market.normalize_by_pairs() {
                let target = pair.to_string();
                match self.markets.get(&target) {
                    None => {
                        invalid.insert(
                            key.clone(),
                            format!("{key}: normalize-by market {target} not found"),
                        );
                        break;
                    }
                    Some(dep) if market.is_enabled() && !dep.is_enabled() => {
                        invalid.insert(
                            key.clone(),
                            format!("{key}: enabled market normalizes by disabled market {target}"),
                        );
                        break;
                    }
                    _ => {}
                }
            }
        }

        for ticker in self.cyclic_tickers() {
            invalid
                .entry(ticker.clone())
                .or_insert_with(|| format!("{ticker}: cyclic normalize-by reference"));
        }

        invalid
    }

    /// Tickers that sit on a normalize-by cycle
    fn cyclic_tickers(&self) -> BTreeSet<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            mm: &MarketMap,
            node: &str,
            marks: &mut BTreeMap<String, Mark>,
            stack: &mut Vec<String>,
            cyclic: &mut BTreeSet<String>,
        ) {
            match marks.get(node) {
                Some(Mark::Done) => return,
                Some(Mark::Visiting) => {
                    if let Some(pos) = stack.iter().position(|t| t == node) {
                        cyclic.extend(stack[pos..].iter().cloned());
                    }
                    return;
                }
                None => {}
            }
            let Some(market) = mm.get(node) else {
                return;
            };
            marks.insert(node.to_string(), Mark::Visiting);
            stack.push(node.to_string());
            for pair in market.normalize_by_pairs() {
                visit(mm, &pair.to_string(), marks, stack, cyclic);
            }
            stack.pop();
            marks.insert(node.to_string(), Mark::Done);
        }

        let mut marks = BTreeMap::new();
        let mut cyclic = BTreeSet::new();
        for key in self.markets.keys() {
            let mut stack = Vec::new();
            visit(self, key, &mut marks, &mut stack, &mut cyclic);
        }
        cyclic
    }

    pub fn validate(&self) -> Result<(), MmuError> {
        let invalid = self.invalid_markets();
        if invalid.is_empty() {
            return Ok(());
        }
        Err(MmuError::validation(
            invalid.into_values().collect::<Vec<_>>().join("; "),
        ))
    }

    /// Largest subset that validates, plus the tickers that were dropped
    pub fn valid_subset(&self) -> (MarketMap, Vec<String>) {
        let mut subset = self.clone();
        let mut dropped = Vec::new();
        loop {
            let invalid = subset.invalid_markets();
            if invalid.is_empty() {
                break;
            }
            for ticker in invalid.into_keys() {
                subset.remove(&ticker);
                dropped.push(ticker);
            }
        }
        dropped.sort();
        (subset, dropped)
    }

    /// Apply the load-time validation policy
    pub fn checked(self, mode: ValidationMode, label: &str) -> Result<MarketMap> {
        match mode {
            ValidationMode::Strict => {
                self.validate()?;
                Ok(self)
            }
            ValidationMode::ValidSubset => {
                let (subset, dropped) = self.valid_subset();
                if !dropped.is_empty() {
                    warn!(
                        map = %label,
                        dropped = ?dropped,
                        "invalid markets found, continuing with valid subset"
                    );
                }
                Ok(subset)
            }
        }
    }
}
