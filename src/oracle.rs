// Oracle collaborator
//
// The engine reads one price per market at the start of every block. Where the
// price comes from (a feed aggregator, a fixed table in tests) is behind the
// PriceOracle trait. Stale prices are treated as missing.

use crate::types::{Denom, Price, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A price observation with the time it was published.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OraclePrice {
    pub price: Price,
    pub timestamp: Timestamp,
    /// Seconds after `timestamp` before the price is considered stale
    pub ttl_secs: Option<i64>,
}

impl OraclePrice {
    pub fn new(price: Price, timestamp: Timestamp) -> Self {
        Self {
            price,
            timestamp,
            ttl_secs: None,
        }
    }

    pub fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }

    pub fn is_stale(&self, now: Timestamp) -> bool {
        self.ttl_secs
            .is_some_and(|ttl| now > self.timestamp.plus_secs(ttl))
    }
}

pub trait PriceOracle: fmt::Debug {
    /// Price of `base` quoted in `quote`, if the oracle tracks the pair.
    fn price(&self, base: &Denom, quote: &Denom) -> Option<OraclePrice>;

    /// Price usable at `now`: present and not stale.
    fn fresh_price(&self, base: &Denom, quote: &Denom, now: Timestamp) -> Option<Price> {
        self.price(base, quote)
            .filter(|p| !p.is_stale(now))
            .map(|p| p.price)
    }
}

/// Fixed price table. Used by the simulator and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    prices: BTreeMap<(Denom, Denom), OraclePrice>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, base: &str, quote: &str, price: Price, timestamp: Timestamp) {
        self.prices
            .insert((Denom::from(base), Denom::from(quote)), OraclePrice::new(price, timestamp));
    }

    pub fn set_observation(&mut self, base: &str, quote: &str, observation: OraclePrice) {
        self.prices.insert((Denom::from(base), Denom::from(quote)), observation);
    }

    pub fn with_price(mut self, base: &str, quote: &str, price: Price) -> Self {
        self.set(base, quote, price, Timestamp::default());
        self
    }

    pub fn remove(&mut self, base: &str, quote: &str) {
        self.prices.remove(&(Denom::from(base), Denom::from(quote)));
    }
}

impl PriceOracle for StaticOracle {
    fn price(&self, base: &Denom, quote: &Denom) -> Option<OraclePrice> {
        self.prices.get(&(base.clone(), quote.clone())).copied()
    }
}
