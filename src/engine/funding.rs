//! Funding premium sampling and settlement for perpetual markets.
//!
//! Positions are not touched here: each position carries the cumulative funding
//! it last settled at and pays the difference when it next trades, is liquidated
//! or is settled.

use super::core::Engine;
use crate::events::{EventPayload, FundingAppliedEvent};
use crate::funding::{calculate_premium, FundingParams};
use crate::types::MarketId;
use rust_decimal::Decimal;
use tracing::info;

impl Engine {
    /// Record one premium sample per active perpetual that has both a mark and a two-sided book.
    pub(super) fn sample_funding_premiums(&mut self) {
        for market in self.state.markets.values_mut() {
            if !market.is_active() {
                continue;
            }
            let (Some(mark), Some(mid)) = (market.mark_price, market.book.mid_price()) else {
                continue;
            };
            if let Some(funding) = market.funding.as_mut() {
                funding.record_premium(calculate_premium(mid, mark));
            }
        }
    }

    /// Settle every funding interval that elapsed. Returns the last applied rate.
    pub(super) fn settle_funding(&mut self, market_id: MarketId) -> Option<Decimal> {
        let params = FundingParams::from_exchange(&self.config.params);
        let now = self.block.time;

        let market = self.state.markets.get_mut(&market_id)?;
        if !market.is_active() {
            return None;
        }
        let mark = market.mark_price?;
        let funding = market.funding.as_mut()?;

        let mut applied = Vec::new();
        while funding.is_due(now) {
            let rate = funding.settle(mark, &params);
            applied.push((rate, funding.cumulative_funding));
        }

        let last_rate = applied.last().map(|(rate, _)| *rate);
        for (rate, cumulative_funding) in applied {
            info!(market = %market_id, %rate, %cumulative_funding, mark = %mark, "funding settled");
            self.emit_event(EventPayload::FundingApplied(FundingAppliedEvent {
                market_id,
                rate,
                cumulative_funding,
                mark_price: mark,
            }));
        }
        last_rate
    }
}
