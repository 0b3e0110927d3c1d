//! Liquidation of underwater positions.

use super::core::Engine;
use super::results::{EngineError, LiquidationResult};
use crate::events::{CancelReason, EventPayload, InsuranceDrawdownEvent, LiquidationEvent, Placement};
use crate::liquidation::{cover_shortfall, evaluate_position, split_payout};
use crate::market::MarketStatus;
use crate::matching::{would_cross, ExecutionPhase};
use crate::order::{compute_order_hash, Order, OrderClass, OrderSpec, OrderType};
use crate::position::Position;
use crate::types::{MarketId, Price, Side, SubaccountId};
use rust_decimal::Decimal;
use tracing::{info, warn};

impl Engine {
    /// Close `subaccount_id`'s position against the book.
    ///
    /// The owner's orders in the market are canceled first. A liquidator may
    /// supply a resting order to close against; otherwise the best resting
    /// orders are used. The whole position must close or nothing happens.
    pub(super) fn liquidate_position(
        &mut self,
        market_id: MarketId,
        subaccount_id: SubaccountId,
        liquidator: SubaccountId,
        liquidator_order: Option<OrderSpec>,
    ) -> Result<LiquidationResult, EngineError> {
        let market = self.market(market_id)?;
        let config = market.config.clone();
        if !config.market_type.is_leveraged() {
            return Err(EngineError::UnsupportedMarketType {
                market_type: config.market_type,
                operation: "liquidation",
            });
        }
        if !matches!(market.status, MarketStatus::Active | MarketStatus::Paused) {
            return Err(EngineError::MarketNotActive {
                market: market_id,
                status: market.status,
            });
        }
        let status = market.status;
        let cumulative_funding = market.cumulative_funding();
        let position = self
            .state
            .positions
            .get(market_id, subaccount_id)
            .cloned()
            .ok_or(EngineError::PositionNotFound {
                market: market_id,
                subaccount: subaccount_id,
            })?;
        let mark = market.mark_price.ok_or(EngineError::NoMarkPrice(market_id))?;
        let check = evaluate_position(&position, mark.value(), config.maintenance_margin_ratio, cumulative_funding);
        if !check.liquidatable {
            return Err(EngineError::PositionNotLiquidable {
                market: market_id,
                subaccount: subaccount_id,
            });
        }

        // undone wholesale if the insurance fund cannot absorb the loss
        let checkpoint = (self.state.clone(), self.events.len(), self.next_event_id);

        self.cancel_subaccount_orders(market_id, subaccount_id, CancelReason::Liquidation)?;
        if let Some(spec) = liquidator_order {
            self.rest_liquidator_order(&position, liquidator, spec)?;
        }

        let depth = self.market(market_id)?.book.depth_within(position.side, None);
        if depth < position.quantity {
            return Err(EngineError::NoLiquidity(market_id));
        }

        let mut closing = self.closing_order(market_id, subaccount_id, &position, mark);
        let execution = self.execute_taker(market_id, &mut closing, ExecutionPhase::Liquidation, None)?;
        if execution.filled_quantity < position.quantity {
            return Err(EngineError::NoLiquidity(market_id));
        }

        let payout = execution.payout;
        let quote = config.quote_denom.clone();
        let mut result = LiquidationResult {
            market_id,
            subaccount_id,
            quantity: position.quantity,
            bankruptcy_price: check.bankruptcy_price,
            average_price: execution.average_price(),
            payout,
            liquidator_reward: Decimal::ZERO,
            insurance_contribution: Decimal::ZERO,
            owner_contribution: Decimal::ZERO,
            insurance_draw: Decimal::ZERO,
            settlement: None,
        };

        if payout >= Decimal::ZERO {
            let split = split_payout(payout, self.config.params.liquidator_reward_share_rate);
            self.state.deposits.credit(liquidator, &quote, split.liquidator_reward)?;
            result.liquidator_reward = split.liquidator_reward;
            result.insurance_contribution = split.insurance_contribution;
            self.credit_protocol_fees(&quote, split.dust);
            self.emit_liquidation(&result, liquidator);
            self.fund_insurance(market_id, &quote, split.insurance_contribution)?;
            return Ok(result);
        }

        let missing = -payout;
        let owner_available = self.state.deposits.get(subaccount_id, &quote).available;
        let coverage = cover_shortfall(missing, owner_available, self.insurance.balance(market_id));

        if !coverage.is_covered() {
            let (state, events_len, next_event_id) = checkpoint;
            self.state = state;
            self.events.truncate(events_len);
            self.next_event_id = next_event_id;
            warn!(
                market = %market_id,
                subaccount = %subaccount_id,
                uncovered = %coverage.uncovered,
                "insurance fund cannot cover liquidation, winding market down"
            );
            if status == MarketStatus::Active {
                self.pause_market(market_id)?;
            }
            let plan = self.settle_market_positions(market_id, mark.value())?;
            result.average_price = None;
            result.payout = Decimal::ZERO;
            result.settlement = Some(plan);
            return Ok(result);
        }

        self.state.deposits.debit(subaccount_id, &quote, coverage.from_owner)?;
        self.credit_protocol_fees(&quote, coverage.insurance_surplus);
        result.owner_contribution = coverage.from_owner;
        result.insurance_draw = coverage.insurance_draw;
        self.emit_liquidation(&result, liquidator);
        if !coverage.insurance_draw.is_zero() {
            self.emit_event(EventPayload::InsuranceDrawdown(InsuranceDrawdownEvent {
                market_id,
                amount: coverage.insurance_draw,
                shortfall: missing - coverage.from_owner,
            }));
            self.draw_insurance(market_id, &quote, coverage.insurance_draw)?;
        }
        Ok(result)
    }

    // the liquidator's order rests as a maker the close can hit
    fn rest_liquidator_order(
        &mut self,
        position: &Position,
        liquidator: SubaccountId,
        spec: OrderSpec,
    ) -> Result<(), EngineError> {
        let plain = matches!(spec.order_type, OrderType::Buy | OrderType::Sell);
        if spec.subaccount_id != liquidator || !plain || spec.side() != position.side {
            return Err(EngineError::InvalidOrderType {
                order_type: spec.order_type,
                reason: "liquidator order must be a plain limit order of the liquidator facing the position",
            });
        }
        let admitted = self.admit_order(&spec, OrderClass::Limit)?;
        let order = admitted.order;
        let market_id = order.market_id;
        if would_cross(&order, self.market(market_id)?.book.best_price(order.side.opposite())) {
            return Err(EngineError::PostOnlyWouldCross);
        }
        self.emit_placed(&order, Placement::Resting);
        self.state.metadata.track(&order, false);
        self.market_mut(market_id)?.book.insert(order);
        Ok(())
    }

    // synthetic reduce-only market order that closes the whole position, unbounded in price
    fn closing_order(&mut self, market_id: MarketId, subaccount_id: SubaccountId, position: &Position, mark: Price) -> Order {
        let side = position.side.opposite();
        let order_type = match side {
            Side::Buy => OrderType::Buy,
            Side::Sell => OrderType::Sell,
        };
        let spec = OrderSpec::new(market_id, subaccount_id, order_type, mark, position.quantity);
        let nonce = self.next_nonce(subaccount_id);
        let sequence = self.next_sequence();
        Order {
            hash: compute_order_hash(&spec, OrderClass::Market, nonce),
            market_id,
            subaccount_id,
            fee_recipient: None,
            order_type,
            class: OrderClass::Market,
            side,
            price: mark,
            quantity: position.quantity,
            fillable: position.quantity,
            margin: Decimal::ZERO,
            locked: Decimal::ZERO,
            fee_rate: Decimal::ZERO,
            reduce_only: true,
            trigger_price: None,
            sequence,
        }
    }

    fn emit_liquidation(&mut self, result: &LiquidationResult, liquidator: SubaccountId) {
        info!(
            market = %result.market_id,
            subaccount = %result.subaccount_id,
            quantity = %result.quantity,
            payout = %result.payout,
            insurance_draw = %result.insurance_draw,
            "position liquidated"
        );
        self.emit_event(EventPayload::Liquidation(LiquidationEvent {
            market_id: result.market_id,
            subaccount_id: result.subaccount_id,
            liquidator,
            quantity: result.quantity,
            bankruptcy_price: result.bankruptcy_price,
            average_price: result.average_price,
            payout: result.payout,
            liquidator_reward: result.liquidator_reward,
            insurance_contribution: result.insurance_contribution,
            owner_contribution: result.owner_contribution,
        }));
    }
}
