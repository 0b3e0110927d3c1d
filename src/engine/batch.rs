// 8.8: end-of-block batch. staged market orders take from the resting book first, then
// staged limit orders do. whatever staged limit quantity is left crosses with itself at
// one clearing price before the remainders rest. each staged order's book walk is its own
// unit: a failure cancels that order and nothing else.

use super::core::Engine;
use super::execution::FillLeg;
use super::results::EngineError;
use crate::events::CancelReason;
use crate::fees::compute_trade_fees;
use crate::ledger::DepositDeltas;
use crate::matching::{plan_batch_cross, ExecutionPhase, Fill};
use crate::order::{Order, OrderClass};
use crate::types::{MarketId, Side};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct BatchOutcome {
    pub executed: usize,
    pub rested: usize,
    pub rejected: usize,
    pub fills: usize,
}

#[derive(Debug, Clone, Default)]
struct StagedStep {
    fills: usize,
    // unfilled limit order waiting for the cross
    remainder: Option<Order>,
}

#[derive(Debug, Clone, Copy, Default)]
struct CrossStep {
    fills: usize,
    executed: usize,
    rested: usize,
}

impl Engine {
    pub(super) fn run_batch(&mut self, market_id: MarketId) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let Some(market) = self.state.markets.get_mut(&market_id) else {
            return outcome;
        };
        let mut staged = std::mem::take(&mut market.transient);
        if staged.is_empty() {
            return outcome;
        }
        // stable: admission order survives within each class
        staged.sort_by_key(|o| o.class);

        let mut pending = Vec::new();
        for order in staged {
            let snapshot = order.clone();
            match self.isolated(|engine| engine.execute_staged(order)) {
                Ok(step) => {
                    outcome.fills += step.fills;
                    match step.remainder {
                        Some(order) => pending.push(order),
                        None => outcome.executed += 1,
                    }
                }
                Err(err) => {
                    outcome.rejected += 1;
                    self.reject_staged(snapshot, &err);
                }
            }
        }

        if !pending.is_empty() {
            let snapshot = pending.clone();
            match self.isolated(|engine| engine.cross_staged(market_id, pending)) {
                Ok(step) => {
                    outcome.fills += step.fills;
                    outcome.executed += step.executed;
                    outcome.rested += step.rested;
                }
                Err(err) => {
                    warn!(market = %market_id, error = %err, "batch cross failed");
                    for order in snapshot {
                        outcome.rejected += 1;
                        self.reject_staged(order, &err);
                    }
                }
            }
        }
        debug!(
            market = %market_id,
            executed = outcome.executed,
            rested = outcome.rested,
            rejected = outcome.rejected,
            fills = outcome.fills,
            "batch matched"
        );
        outcome
    }

    /// Walk the resting book with one staged order. Limit orders with quantity
    /// left come back as the remainder.
    fn execute_staged(&mut self, mut order: Order) -> Result<StagedStep, EngineError> {
        let market_id = order.market_id;
        let market = self.market(market_id)?;
        if !market.is_active() {
            self.release_order(order, false, CancelReason::MarketClosed)?;
            return Ok(StagedStep::default());
        }
        let hold_denom = market.config.hold_denom(order.side).clone();

        if order.reduce_only {
            let reducible = self.reducible_quantity(market_id, order.subaccount_id, order.side);
            if reducible.is_zero() {
                self.invalidate_order(order, false, "reduce-only order has no position to reduce")?;
                return Ok(StagedStep::default());
            }
            let released = order.resize(reducible);
            self.state.deposits.unlock(order.subaccount_id, &hold_denom, released);
        }

        let limit = Some(order.price);
        let execution = self.execute_taker(market_id, &mut order, ExecutionPhase::Batch, limit)?;
        let fills = execution.fills.len();

        match order.class {
            OrderClass::Market => {
                if execution.filled_quantity.is_zero() {
                    return Err(EngineError::NoLiquidity(market_id));
                }
                self.state.metadata.untrack(&order, false);
                self.release_untracked(order, CancelReason::Unfilled)?;
                Ok(StagedStep { fills, remainder: None })
            }
            OrderClass::Limit if order.is_filled() => {
                let subaccount_id = order.subaccount_id;
                self.state.metadata.untrack(&order, false);
                self.prune_orphan_reduce_only(market_id, subaccount_id)?;
                Ok(StagedStep { fills, remainder: None })
            }
            OrderClass::Limit => Ok(StagedStep {
                fills,
                remainder: Some(order),
            }),
        }
    }

    /// Cross the staged limit remainders with each other at a single clearing
    /// price, both sides paying the taker fee, then rest whatever is left.
    fn cross_staged(&mut self, market_id: MarketId, pending: Vec<Order>) -> Result<CrossStep, EngineError> {
        let config = self.market(market_id)?.config.clone();
        let cumulative_funding = self.market(market_id)?.cumulative_funding();
        let rates = config
            .fee_rates(self.config.params.relayer_fee_share_rate)
            .as_takers();

        let mut buys = Vec::new();
        let mut sells = Vec::new();
        for mut order in pending {
            if order.reduce_only {
                // fills against the book may have shrunk the position
                let reducible = self.reducible_quantity(market_id, order.subaccount_id, order.side);
                if reducible.is_zero() {
                    self.invalidate_order(order, false, "reduce-only order has no position to reduce")?;
                    continue;
                }
                let released = order.resize(reducible);
                let hold_denom = config.hold_denom(order.side).clone();
                self.state.deposits.unlock(order.subaccount_id, &hold_denom, released);
            }
            match order.side {
                Side::Buy => buys.push(order),
                Side::Sell => sells.push(order),
            }
        }
        buys.sort_by(|a, b| b.price.cmp(&a.price).then(a.sequence.cmp(&b.sequence)));
        sells.sort_by(|a, b| a.price.cmp(&b.price).then(a.sequence.cmp(&b.sequence)));

        let mut step = CrossStep::default();
        let mut participants = BTreeSet::new();
        if let Some(cross) = plan_batch_cross(&buys, &sells) {
            let price = cross.clearing_price;
            for pairing in &cross.matches {
                let quantity = pairing.quantity;
                let fees = compute_trade_fees(price.value() * quantity, &rates, Decimal::ONE, true);
                let buy_take = buys[pairing.buy].take(quantity);
                let sell_take = sells[pairing.sell].take(quantity);
                let (buy, sell) = (&buys[pairing.buy], &sells[pairing.sell]);

                let mut deltas = DepositDeltas::default();
                self.settle_leg(
                    &config,
                    cumulative_funding,
                    FillLeg {
                        order: buy,
                        take: buy_take,
                        fee: fees.taker_fee,
                        route_payout: false,
                    },
                    quantity,
                    price,
                    &mut deltas,
                )?;
                self.settle_leg(
                    &config,
                    cumulative_funding,
                    FillLeg {
                        order: sell,
                        take: sell_take,
                        fee: fees.maker_fee,
                        route_payout: false,
                    },
                    quantity,
                    price,
                    &mut deltas,
                )?;
                self.route_relayer_reward(&config.quote_denom, buy.fee_recipient, fees.taker_relayer_reward, &mut deltas);
                self.route_relayer_reward(&config.quote_denom, sell.fee_recipient, fees.maker_relayer_reward, &mut deltas);
                self.credit_protocol_fees(&config.quote_denom, fees.protocol_fee);
                self.state.deposits.apply(&deltas)?;

                // the sell sits in the maker slot; both legs paid the taker rate
                let fill = Fill {
                    maker_hash: sell.hash,
                    maker_subaccount: sell.subaccount_id,
                    taker_hash: buy.hash,
                    taker_subaccount: buy.subaccount_id,
                    taker_side: Side::Buy,
                    price,
                    quantity,
                    taker_fee: fees.taker_fee,
                    maker_fee: fees.maker_fee,
                };
                self.emit_fill(market_id, ExecutionPhase::Batch, &fill);
                participants.insert(buy.subaccount_id);
                participants.insert(sell.subaccount_id);
                step.fills += 1;
            }
            self.market_mut(market_id)?.last_trade_price = Some(price);
            debug!(market = %market_id, %price, quantity = %cross.quantity(), "staged limit orders crossed");
        }

        for order in buys.into_iter().chain(sells) {
            if order.is_filled() {
                self.state.metadata.untrack(&order, false);
                step.executed += 1;
            } else {
                self.market_mut(market_id)?.book.insert(order);
                step.rested += 1;
            }
        }
        for subaccount_id in participants {
            self.prune_orphan_reduce_only(market_id, subaccount_id)?;
        }
        Ok(step)
    }

    fn reject_staged(&mut self, order: Order, err: &EngineError) {
        let reason = match err {
            EngineError::NoLiquidity(_) => CancelReason::NoLiquidity,
            EngineError::InsufficientDeposit { .. } => CancelReason::InsufficientFunds,
            _ => CancelReason::ExecutionFailed,
        };
        let hash = order.hash;
        if let Err(release_err) = self.release_order(order, false, reason) {
            warn!(order = %hash, error = %release_err, "could not release rejected order");
        }
        debug!(order = %hash, error = %err, "staged order rejected");
    }
}
