//! Market lifecycle: status moves, settlement of every position, expiry.

use super::core::Engine;
use super::results::EngineError;
use crate::events::{
    CancelReason, EventPayload, InsuranceDrawdownEvent, MarketSettledEvent, MarketStatusChangedEvent,
    PositionClosedEvent,
};
use crate::ledger::DepositDeltas;
use crate::market::{MarketError, MarketStatus, MarketType};
use crate::settlement::{plan_settlement, SettlementEntry, SettlementPlan};
use crate::types::MarketId;
use rust_decimal::Decimal;
use tracing::{info, warn};

impl Engine {
    /// Cancel every order in the market: staged, resting and conditional.
    pub(super) fn cancel_all_market_orders(
        &mut self,
        market_id: MarketId,
        reason: CancelReason,
    ) -> Result<usize, EngineError> {
        let market = self.market_mut(market_id)?;
        let staged = std::mem::take(&mut market.transient);
        let resting = market.book.drain();
        let conditional = market.conditional.drain();
        let count = staged.len() + resting.len() + conditional.len();

        for order in staged.into_iter().chain(resting) {
            self.release_order(order, false, reason)?;
        }
        for order in conditional {
            self.release_order(order.order, true, reason)?;
        }
        Ok(count)
    }

    pub(super) fn transition_market(&mut self, market_id: MarketId, to: MarketStatus) -> Result<MarketStatus, EngineError> {
        let market = self.market_mut(market_id)?;
        let from = market.status;
        market.status = from.transition(to)?;
        info!(market = %market_id, ?from, ?to, "market status changed");
        self.emit_event(EventPayload::MarketStatusChanged(MarketStatusChangedEvent {
            market_id,
            from,
            to,
        }));
        Ok(from)
    }

    fn ensure_transition(&self, market_id: MarketId, to: MarketStatus) -> Result<(), EngineError> {
        let from = self.market(market_id)?.status;
        if !from.can_transition_to(to) {
            return Err(MarketError::InvalidStatusTransition { from, to }.into());
        }
        Ok(())
    }

    /// Close every position in the market at `price` and cancel every order.
    ///
    /// Losses beyond margin come from the loser's available balance, then the
    /// insurance fund; whatever is still missing is taken pro rata from every
    /// positive payout. The insurance withdrawal is the last step.
    pub(super) fn settle_market_positions(&mut self, market_id: MarketId, price: Decimal) -> Result<SettlementPlan, EngineError> {
        self.cancel_all_market_orders(market_id, CancelReason::MarketClosed)?;

        let market = self.market(market_id)?;
        let quote = market.config.quote_denom.clone();
        let cumulative_funding = market.cumulative_funding();
        let positions = self.state.positions.in_market(market_id);

        let entries: Vec<SettlementEntry> = positions
            .iter()
            .map(|(subaccount_id, position)| {
                let mut settled = position.clone();
                settled.apply_funding(cumulative_funding);
                SettlementEntry {
                    subaccount_id: *subaccount_id,
                    payout: settled.margin + settled.pnl_at(price),
                    owner_available: self.state.deposits.get(*subaccount_id, &quote).available,
                }
            })
            .collect();

        let plan = plan_settlement(&entries, self.insurance.balance(market_id));

        let mut deltas = DepositDeltas::default();
        for (subaccount_id, amount) in &plan.debits {
            deltas.transfer(*subaccount_id, &quote, -*amount);
        }
        for (subaccount_id, amount) in &plan.credits {
            deltas.transfer(*subaccount_id, &quote, *amount);
        }
        self.state.deposits.apply(&deltas)?;
        self.credit_protocol_fees(&quote, plan.dust);

        for entry in &entries {
            self.state.positions.remove(market_id, entry.subaccount_id);
            self.emit_event(EventPayload::PositionClosed(PositionClosedEvent {
                market_id,
                subaccount_id: entry.subaccount_id,
                payout: entry.payout,
            }));
        }
        self.market_mut(market_id)?.settlement_price = Some(price);

        if !plan.bad_debt.is_zero() {
            warn!(market = %market_id, bad_debt = %plan.bad_debt, "settlement left bad debt");
        }
        info!(
            market = %market_id,
            %price,
            positions = entries.len(),
            deficit = %plan.deficit,
            haircut = %plan.haircut_ratio,
            "market positions settled"
        );
        self.emit_event(EventPayload::MarketSettled(MarketSettledEvent {
            market_id,
            price,
            positions_closed: entries.len(),
            deficit: plan.deficit,
            haircut_ratio: plan.haircut_ratio,
        }));

        if !plan.insurance_draw.is_zero() {
            self.emit_event(EventPayload::InsuranceDrawdown(InsuranceDrawdownEvent {
                market_id,
                amount: plan.insurance_draw,
                shortfall: plan.insurance_draw + plan.deficit,
            }));
            self.draw_insurance(market_id, &quote, plan.insurance_draw)?;
        }
        Ok(plan)
    }

    // mark, else last trade. only required when positions are open
    fn closing_price(&self, market_id: MarketId) -> Result<Option<Decimal>, EngineError> {
        let market = self.market(market_id)?;
        if self.state.positions.in_market(market_id).is_empty() {
            return Ok(None);
        }
        market
            .reference_price()
            .map(|p| Some(p.value()))
            .ok_or(EngineError::NoMarkPrice(market_id))
    }

    /// Resting orders survive a pause; conditional orders cannot trigger and are dropped.
    pub(super) fn pause_market(&mut self, market_id: MarketId) -> Result<(), EngineError> {
        self.ensure_transition(market_id, MarketStatus::Paused)?;
        let conditional = self.market_mut(market_id)?.conditional.drain();
        for order in conditional {
            self.release_order(order.order, true, CancelReason::MarketClosed)?;
        }
        self.transition_market(market_id, MarketStatus::Paused)?;
        Ok(())
    }

    pub(super) fn resume_market(&mut self, market_id: MarketId) -> Result<(), EngineError> {
        self.transition_market(market_id, MarketStatus::Active)?;
        Ok(())
    }

    /// Remove a market from trading for good, closing open positions at the mark.
    pub(super) fn demolish_market(&mut self, market_id: MarketId) -> Result<(), EngineError> {
        self.ensure_transition(market_id, MarketStatus::Demolished)?;
        match self.closing_price(market_id)? {
            Some(price) => {
                self.settle_market_positions(market_id, price)?;
            }
            None => {
                self.cancel_all_market_orders(market_id, CancelReason::MarketClosed)?;
            }
        }
        self.transition_market(market_id, MarketStatus::Demolished)?;
        Ok(())
    }

    pub(super) fn force_settle_market(&mut self, market_id: MarketId, price: Option<Decimal>) -> Result<SettlementPlan, EngineError> {
        let market_type = self.market(market_id)?.config.market_type;
        if !market_type.is_derivative() {
            return Err(EngineError::UnsupportedMarketType {
                market_type,
                operation: "forced settlement",
            });
        }
        self.ensure_transition(market_id, MarketStatus::Settled)?;

        let price = match price {
            Some(price) => price,
            None => self
                .market(market_id)?
                .reference_price()
                .map(|p| p.value())
                .ok_or(EngineError::NoMarkPrice(market_id))?,
        };
        let out_of_range = match market_type {
            MarketType::BinaryOptions => price < Decimal::ZERO || price > Decimal::ONE,
            _ => price < Decimal::ZERO,
        };
        if out_of_range {
            return Err(EngineError::InvalidAmount(price));
        }

        let plan = self.settle_market_positions(market_id, price)?;
        self.transition_market(market_id, MarketStatus::Settled)?;
        Ok(plan)
    }

    /// Settle an active market whose expiry has passed. Returns true when it expired.
    /// Without a price the market stays active and is retried next block.
    pub(super) fn process_expiry(&mut self, market_id: MarketId) -> bool {
        let Some(market) = self.state.markets.get(&market_id) else {
            return false;
        };
        if !market.is_active() || !market.is_expired_at(self.block.time) {
            return false;
        }
        let price = match market.config.market_type {
            MarketType::ExpiryFuture => market.mark_price.map(|p| p.value()),
            // binary outcomes resolve within [0, 1]
            MarketType::BinaryOptions => market.mark_price.map(|p| p.value().min(Decimal::ONE)),
            MarketType::Spot | MarketType::Perpetual => return false,
        };
        let Some(price) = price else {
            warn!(market = %market_id, "market expired without a settlement price");
            return false;
        };

        let result = self.isolated(|engine| {
            engine.settle_market_positions(market_id, price)?;
            engine.transition_market(market_id, MarketStatus::Expired)
        });
        match result {
            Ok(_) => true,
            Err(err) => {
                warn!(market = %market_id, error = %err, "expiry settlement failed");
                false
            }
        }
    }
}
