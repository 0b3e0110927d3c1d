//! Walking the book with a taker order.
//!
//! Shared by atomic orders, the end-of-block batch and liquidations. Every fill
//! prints at the maker's price and settles both sides before the next maker is
//! considered, so reduce-only clipping always sees the live position. Staged
//! limit orders crossing each other settle through the same legs at a clearing
//! price instead (see batch.rs).

use super::core::Engine;
use super::results::EngineError;
use crate::events::{EventPayload, FillEvent, PositionClosedEvent, PositionUpdatedEvent};
use crate::fees::compute_trade_fees;
use crate::ledger::DepositDeltas;
use crate::market::MarketConfig;
use crate::matching::{crosses, ExecutionPhase, Fill, TakerExecution};
use crate::order::{Order, OrderTake};
use crate::position::apply_trade;
use crate::types::{Denom, MarketId, Price, Side, SubaccountId};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::trace;

/// One side of a fill, as seen by the settlement step.
pub(super) struct FillLeg<'a> {
    pub order: &'a Order,
    pub take: OrderTake,
    pub fee: Decimal,
    // liquidation closes route the position payout to the caller
    pub route_payout: bool,
}

impl Engine {
    /// Match `taker` against the opposite side of the book until it is filled,
    /// the book is exhausted, or the next maker is beyond `limit`.
    pub(super) fn execute_taker(
        &mut self,
        market_id: MarketId,
        taker: &mut Order,
        phase: ExecutionPhase,
        limit: Option<Price>,
    ) -> Result<TakerExecution, EngineError> {
        let market = self.market(market_id)?;
        let config = market.config.clone();
        let cumulative_funding = market.cumulative_funding();
        let rates = config.fee_rates(self.config.params.relayer_fee_share_rate);
        let multiplier = match phase {
            ExecutionPhase::Atomic => self.atomic_fee_multiplier(market_id),
            _ => Decimal::ONE,
        };
        let maker_side = taker.side.opposite();

        let mut execution = TakerExecution::default();
        let mut participants = BTreeSet::from([taker.subaccount_id]);

        while !taker.fillable.is_zero() {
            let market = self.market_mut(market_id)?;
            let Some(best) = market.book.best(maker_side) else {
                break;
            };
            if !crosses(taker.side, limit, best.price) {
                break;
            }
            let maker_hash = best.hash;
            let Some(mut maker) = market.book.remove(&maker_hash) else {
                break;
            };

            if maker.reduce_only {
                let reducible = self.reducible_quantity(market_id, maker.subaccount_id, maker.side);
                if reducible.is_zero() {
                    self.invalidate_order(maker, false, "reduce-only order has no position to reduce")?;
                    continue;
                }
                maker.resize(reducible);
            }

            let quantity = taker.fillable.min(maker.fillable);
            let price = maker.price;
            let notional = price.value() * quantity;
            let fees = compute_trade_fees(notional, &rates, multiplier, phase.charges_taker());

            let maker_take = maker.take(quantity);
            let taker_take = taker.take(quantity);

            let mut deltas = DepositDeltas::default();
            self.settle_leg(
                &config,
                cumulative_funding,
                FillLeg {
                    order: &maker,
                    take: maker_take,
                    fee: fees.maker_fee,
                    route_payout: false,
                },
                quantity,
                price,
                &mut deltas,
            )?;
            execution.payout += self.settle_leg(
                &config,
                cumulative_funding,
                FillLeg {
                    order: &*taker,
                    take: taker_take,
                    fee: fees.taker_fee,
                    route_payout: phase == ExecutionPhase::Liquidation,
                },
                quantity,
                price,
                &mut deltas,
            )?;
            self.route_relayer_reward(&config.quote_denom, taker.fee_recipient, fees.taker_relayer_reward, &mut deltas);
            self.route_relayer_reward(&config.quote_denom, maker.fee_recipient, fees.maker_relayer_reward, &mut deltas);
            self.credit_protocol_fees(&config.quote_denom, fees.protocol_fee);
            self.state.deposits.apply(&deltas)?;

            let fill = Fill {
                maker_hash: maker.hash,
                maker_subaccount: maker.subaccount_id,
                taker_hash: taker.hash,
                taker_subaccount: taker.subaccount_id,
                taker_side: taker.side,
                price,
                quantity,
                taker_fee: fees.taker_fee,
                maker_fee: fees.maker_fee,
            };
            self.emit_fill(market_id, phase, &fill);
            execution.record(fill);
            participants.insert(maker.subaccount_id);

            if maker.is_filled() {
                self.state.metadata.untrack(&maker, false);
            } else {
                self.market_mut(market_id)?.book.insert(maker);
            }
        }

        if let Some(last) = execution.fills.last() {
            self.market_mut(market_id)?.last_trade_price = Some(last.price);
        }
        for subaccount_id in participants {
            self.prune_orphan_reduce_only(market_id, subaccount_id)?;
        }
        Ok(execution)
    }

    pub(super) fn emit_fill(&mut self, market_id: MarketId, phase: ExecutionPhase, fill: &Fill) {
        self.emit_event(EventPayload::Fill(FillEvent {
            market_id,
            phase,
            maker_hash: fill.maker_hash,
            maker: fill.maker_subaccount,
            taker_hash: fill.taker_hash,
            taker: fill.taker_subaccount,
            taker_side: fill.taker_side,
            price: fill.price,
            quantity: fill.quantity,
            taker_fee: fill.taker_fee,
            maker_fee: fill.maker_fee,
        }));
        trace!(market = %market_id, price = %fill.price, quantity = %fill.quantity, maker = %fill.maker_hash, taker = %fill.taker_hash, "fill");
    }

    /// Settle one side of a fill into `deltas` and the position store.
    /// Returns the payout routed to the caller instead of the deposit.
    pub(super) fn settle_leg(
        &mut self,
        config: &MarketConfig,
        cumulative_funding: Decimal,
        leg: FillLeg<'_>,
        quantity: Decimal,
        price: Price,
        deltas: &mut DepositDeltas,
    ) -> Result<Decimal, EngineError> {
        let order = leg.order;
        let subaccount_id = order.subaccount_id;
        let notional = price.value() * quantity;

        if !config.is_derivative() {
            match order.side {
                Side::Buy => {
                    let spent = notional + leg.fee;
                    deltas.add(subaccount_id, &config.quote_denom, leg.take.released - spent, -spent);
                    deltas.transfer(subaccount_id, &config.base_denom, quantity);
                }
                Side::Sell => {
                    deltas.add(subaccount_id, &config.base_denom, leg.take.released - quantity, -quantity);
                    deltas.transfer(subaccount_id, &config.quote_denom, notional - leg.fee);
                }
            }
            return Ok(Decimal::ZERO);
        }

        let market_id = config.id;
        let existing = self.state.positions.get(market_id, subaccount_id).cloned();
        let had_position = existing.is_some();
        let (position, outcome) = apply_trade(
            existing,
            order.side,
            quantity,
            price.value(),
            leg.take.margin,
            cumulative_funding,
        );

        match &position {
            Some(position) => self.emit_event(EventPayload::PositionUpdated(PositionUpdatedEvent {
                market_id,
                subaccount_id,
                side: position.side,
                quantity: position.quantity,
                entry_price: position.entry_price,
                margin: position.margin,
            })),
            None if had_position => self.emit_event(EventPayload::PositionClosed(PositionClosedEvent {
                market_id,
                subaccount_id,
                payout: outcome.payout,
            })),
            None => {}
        }
        self.state.positions.set(market_id, subaccount_id, position);

        let routed = if leg.route_payout { outcome.payout } else { Decimal::ZERO };
        let credited = outcome.payout - routed - outcome.margin_added - leg.fee;
        deltas.add(
            subaccount_id,
            &config.quote_denom,
            leg.take.released + credited,
            credited,
        );
        Ok(routed)
    }

    pub(super) fn route_relayer_reward(
        &mut self,
        denom: &Denom,
        recipient: Option<SubaccountId>,
        reward: Decimal,
        deltas: &mut DepositDeltas,
    ) {
        if reward.is_zero() {
            return;
        }
        match recipient {
            Some(recipient) => deltas.transfer(recipient, denom, reward),
            None => self.credit_protocol_fees(denom, reward),
        }
    }
}
