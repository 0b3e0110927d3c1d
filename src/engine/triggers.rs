// 8.9: conditional trigger pass. runs before the batch so triggered orders
// match in the same block. market orders trigger ahead of limit orders.

use super::core::Engine;
use super::orders::required_hold;
use super::results::EngineError;
use crate::events::{CancelReason, ConditionalTriggeredEvent, EventPayload, OrderInvalidatedEvent};
use crate::metadata::{has_capacity, OrderSlot};
use crate::order::{Order, OrderClass};
use crate::types::MarketId;
use tracing::{debug, warn};

impl Engine {
    /// Convert every conditional order whose trigger the reference price crossed.
    /// Returns how many triggered.
    pub(super) fn run_triggers(&mut self, market_id: MarketId) -> usize {
        let Some(market) = self.state.markets.get(&market_id) else {
            return 0;
        };
        if !market.is_active() {
            return 0;
        }
        let Some(reference) = market.reference_price() else {
            return 0;
        };

        let mut triggered = 0;
        for hash in market.conditional.triggered(reference) {
            let removed = self
                .state
                .markets
                .get_mut(&market_id)
                .and_then(|m| m.conditional.remove(&hash));
            let Some(conditional) = removed else {
                continue;
            };
            triggered += 1;
            let order = conditional.order;
            self.state.metadata.untrack(&order, true);
            self.emit_event(EventPayload::ConditionalTriggered(ConditionalTriggeredEvent {
                market_id,
                order_hash: order.hash,
                subaccount_id: order.subaccount_id,
                trigger_price: conditional.trigger_price,
                reference_price: reference,
                class: order.class,
            }));
            debug!(market = %market_id, order = %order.hash, trigger = %conditional.trigger_price, %reference, "conditional triggered");

            let snapshot = order.clone();
            if let Err(err) = self.isolated(|engine| engine.stage_triggered(order)) {
                let reason = match err {
                    EngineError::InsufficientDeposit { .. } => CancelReason::InsufficientFunds,
                    _ => CancelReason::ExecutionFailed,
                };
                if let Err(release_err) = self.release_untracked(snapshot, reason) {
                    warn!(order = %hash, error = %release_err, "could not release triggered order");
                }
                debug!(order = %hash, error = %err, "triggered order dropped");
            }
        }
        triggered
    }

    // a triggered order is a fresh taker: re-size, re-fund at current rates, re-check caps
    fn stage_triggered(&mut self, mut order: Order) -> Result<(), EngineError> {
        let market_id = order.market_id;
        let config = self.market(market_id)?.config.clone();
        let hold_denom = config.hold_denom(order.side).clone();

        if order.reduce_only {
            let reducible = self.reducible_quantity(market_id, order.subaccount_id, order.side);
            if reducible.is_zero() {
                let released = order.release_all();
                self.state.deposits.unlock(order.subaccount_id, &hold_denom, released);
                self.emit_event(EventPayload::OrderInvalidated(OrderInvalidatedEvent {
                    market_id,
                    order_hash: order.hash,
                    subaccount_id: order.subaccount_id,
                    reason: "reduce-only order has no position to reduce".to_string(),
                }));
                return Ok(());
            }
            let released = order.resize(reducible);
            self.state.deposits.unlock(order.subaccount_id, &hold_denom, released);
        }

        order.fee_rate = self.hold_fee_rate(&config, order.order_type);
        let required = required_hold(&config, &order);
        if required > order.locked {
            self.state
                .deposits
                .lock(order.subaccount_id, &hold_denom, required - order.locked)?;
        } else {
            self.state
                .deposits
                .unlock(order.subaccount_id, &hold_denom, order.locked - required);
        }
        order.locked = required;

        match order.class {
            OrderClass::Market if config.is_derivative() => {
                self.claim_block_market_order(market_id, order.subaccount_id)?;
            }
            OrderClass::Limit => {
                if let Some(slot) = OrderSlot::of(&order, false) {
                    let meta = self.state.metadata.get(market_id, order.subaccount_id, order.side);
                    if !has_capacity(&meta, slot, config.market_type, self.config.params.max_orders_per_side) {
                        return Err(EngineError::ExceedsOrderSideCount {
                            market: market_id,
                            subaccount: order.subaccount_id,
                            side: order.side,
                        });
                    }
                }
            }
            OrderClass::Market => {}
        }

        self.state.metadata.track(&order, false);
        self.market_mut(market_id)?.transient.push(order);
        Ok(())
    }
}
