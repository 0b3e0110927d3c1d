// 5.0: funding for perpetual markets. each interval longs pay shorts or vice versa to keep
// the book near the oracle. 5.0 has the params/state structs. 5.1 has the rate logic.
// positions settle lazily against the cumulative index (see position.rs).

use crate::config::ExchangeParams;
use crate::types::{Price, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundingParams {
    pub interval_secs: i64,
    pub hourly_rate_cap: Decimal,
    pub hourly_interest_rate: Decimal,
}

impl FundingParams {
    pub fn from_exchange(params: &ExchangeParams) -> Self {
        Self {
            interval_secs: params.funding_interval_secs,
            hourly_rate_cap: params.hourly_funding_rate_cap,
            hourly_interest_rate: params.hourly_interest_rate,
        }
    }

    // rate cap and interest scale with the interval length
    fn interval_hours(&self) -> Decimal {
        Decimal::from(self.interval_secs) / Decimal::from(3600)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingState {
    pub cumulative_funding: Decimal,
    pub last_rate: Decimal,
    pub next_funding_time: Timestamp,
    // premium samples collected since the last settlement
    pub premium_sum: Decimal,
    pub premium_samples: u32,
}

impl FundingState {
    pub fn new(start: Timestamp, interval_secs: i64) -> Self {
        Self {
            cumulative_funding: Decimal::ZERO,
            last_rate: Decimal::ZERO,
            next_funding_time: next_boundary(start, interval_secs),
            premium_sum: Decimal::ZERO,
            premium_samples: 0,
        }
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        now >= self.next_funding_time
    }

    pub fn record_premium(&mut self, premium: Decimal) {
        self.premium_sum += premium;
        self.premium_samples += 1;
    }

    pub fn average_premium(&self) -> Decimal {
        if self.premium_samples == 0 {
            Decimal::ZERO
        } else {
            self.premium_sum / Decimal::from(self.premium_samples)
        }
    }

    /// 5.2: settle one interval. returns the applied rate.
    pub fn settle(&mut self, mark: Price, params: &FundingParams) -> Decimal {
        let rate = calculate_funding_rate(self.average_premium(), params);
        self.cumulative_funding += crate::fees::truncate(rate * mark.value());
        self.last_rate = rate;
        self.premium_sum = Decimal::ZERO;
        self.premium_samples = 0;
        self.next_funding_time = self.next_funding_time.plus_secs(params.interval_secs);
        rate
    }
}

fn next_boundary(start: Timestamp, interval_secs: i64) -> Timestamp {
    let secs = start.as_secs();
    Timestamp::from_secs((secs.div_euclid(interval_secs) + 1) * interval_secs)
}

// 5.1: how far the book is from the oracle. positive = book above oracle
pub fn calculate_premium(mid: Decimal, mark: Price) -> Decimal {
    (mid - mark.value()) / mark.value()
}

pub fn calculate_funding_rate(average_premium: Decimal, params: &FundingParams) -> Decimal {
    let hours = params.interval_hours();
    let cap = params.hourly_rate_cap * hours;
    let rate = average_premium + params.hourly_interest_rate * hours;
    rate.max(-cap).min(cap)
}
