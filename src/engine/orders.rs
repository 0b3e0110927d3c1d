//! Order admission, cancellation and batch updates.

use super::core::Engine;
use super::results::{BatchUpdateResult, EngineError, OrderResult};
use crate::conditional::{validate_trigger, ConditionalOrder, TriggerDirection};
use crate::config::AtomicAccess;
use crate::events::{CancelReason, EventPayload, OrderCanceledEvent, OrderInvalidatedEvent, OrderPlacedEvent, Placement};
use crate::fees::{margin_hold, spot_buy_hold, truncate};
use crate::margin::{check_order_margin, MarginError};
use crate::market::{MarketConfig, MarketType};
use crate::matching::{would_cross, ExecutionPhase};
use crate::messages::{BatchUpdate, Origin};
use crate::metadata::{has_capacity, OrderSlot};
use crate::order::{compute_order_hash, Order, OrderClass, OrderSpec, OrderType};
use crate::types::{MarketId, OrderHash, Side, SubaccountId};
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// An order that passed admission and holds its funds, not yet routed.
pub(super) struct AdmittedOrder {
    pub order: Order,
    pub direction: Option<TriggerDirection>,
}

/// Funds an order must keep locked for its unfilled quantity.
pub(super) fn required_hold(config: &MarketConfig, order: &Order) -> Decimal {
    let price = order.price.value();
    match (config.market_type, order.side) {
        (MarketType::Spot, Side::Buy) => truncate(spot_buy_hold(price, order.fillable, order.fee_rate)),
        (MarketType::Spot, Side::Sell) => order.fillable,
        _ if order.reduce_only => Decimal::ZERO,
        _ => truncate(margin_hold(price, order.fillable, order.margin, order.fee_rate)),
    }
}

fn validate_order_shape(config: &MarketConfig, spec: &OrderSpec, class: OrderClass) -> Result<(), EngineError> {
    config.validate_price(spec.price)?;
    config.validate_quantity(spec.quantity)?;

    let order_type = spec.order_type;
    let invalid = |reason: &'static str| EngineError::InvalidOrderType { order_type, reason };
    if order_type.is_post_only() && class != OrderClass::Limit {
        return Err(invalid("post-only orders must be limit orders"));
    }
    if order_type.is_atomic() && class != OrderClass::Market {
        return Err(invalid("atomic orders must be market orders"));
    }
    match (order_type.is_conditional(), spec.trigger_price) {
        (true, None) => return Err(invalid("conditional order without trigger price")),
        (false, Some(_)) => return Err(invalid("trigger price on a non-conditional order")),
        (true, Some(trigger)) => config.validate_price(trigger)?,
        (false, None) => {}
    }
    if spec.margin < Decimal::ZERO {
        return Err(MarginError::NegativeMargin(spec.margin).into());
    }
    if !config.is_derivative() && !spec.margin.is_zero() {
        return Err(invalid("spot orders carry no margin"));
    }
    Ok(())
}

impl Engine {
    pub(super) fn create_order(
        &mut self,
        origin: Origin,
        spec: OrderSpec,
        class: OrderClass,
    ) -> Result<OrderResult, EngineError> {
        let market = self.market(spec.market_id)?;
        if !market.is_active() {
            return Err(EngineError::MarketNotActive {
                market: spec.market_id,
                status: market.status,
            });
        }
        if spec.order_type.is_atomic() {
            self.check_atomic_access(origin)?;
        }
        let admitted = self.admit_order(&spec, class)?;
        self.route_order(admitted)
    }

    fn check_atomic_access(&self, origin: Origin) -> Result<(), EngineError> {
        match (self.config.params.atomic_access, origin) {
            (AtomicAccess::Everyone, _) | (AtomicAccess::SmartContractsOnly, Origin::SmartContract) => Ok(()),
            _ => Err(EngineError::AtomicAccessDenied),
        }
    }

    /// Fee rate an order of `order_type` reserves in its hold.
    pub(super) fn hold_fee_rate(&self, config: &MarketConfig, order_type: OrderType) -> Decimal {
        let rates = config.fee_rates(self.config.params.relayer_fee_share_rate);
        if order_type.is_atomic() {
            rates.taker_hold_rate(self.atomic_fee_multiplier(config.id))
        } else if order_type.is_post_only() {
            rates.maker_hold_rate()
        } else {
            rates.taker_hold_rate(Decimal::ONE).max(rates.maker_hold_rate())
        }
    }

    /// Validate, size, cap-check and fund an order. Market status is the caller's concern.
    pub(super) fn admit_order(&mut self, spec: &OrderSpec, class: OrderClass) -> Result<AdmittedOrder, EngineError> {
        let market = self.market(spec.market_id)?;
        let config = market.config.clone();
        validate_order_shape(&config, spec, class)?;

        let direction = match spec.trigger_price {
            Some(trigger) => {
                let mark = market.reference_price().ok_or(EngineError::NoMarkPrice(spec.market_id))?;
                Some(validate_trigger(spec.order_type, trigger, mark)?)
            }
            None => None,
        };
        // conditional orders are margined against the price they will trigger at
        let margin_reference = spec.trigger_price.or(market.mark_price).map(|p| p.value());

        let side = spec.side();
        let reduce_only = config.is_derivative() && spec.margin.is_zero();
        let mut quantity = spec.quantity;

        if reduce_only {
            let position = self.state.positions.get(spec.market_id, spec.subaccount_id);
            if direction.is_some() {
                if position.is_none() && !self.has_vanilla_limit_orders(spec.market_id, spec.subaccount_id) {
                    return Err(EngineError::PositionNotFound {
                        market: spec.market_id,
                        subaccount: spec.subaccount_id,
                    });
                }
            } else {
                let position = position.ok_or(EngineError::PositionNotFound {
                    market: spec.market_id,
                    subaccount: spec.subaccount_id,
                })?;
                if position.side == side {
                    return Err(EngineError::InvalidReduceOnlyPositionDirection { side });
                }
                quantity = quantity.min(position.quantity);
            }
        } else if config.is_derivative() {
            check_order_margin(
                config.market_type,
                side,
                spec.price.value(),
                quantity,
                spec.margin,
                config.initial_margin_ratio,
                margin_reference,
            )?;
        }

        let fee_rate = self.hold_fee_rate(&config, spec.order_type);
        let nonce = self.next_nonce(spec.subaccount_id);
        let hash = compute_order_hash(spec, class, nonce);
        let sequence = self.next_sequence();
        let mut order = Order {
            hash,
            market_id: spec.market_id,
            subaccount_id: spec.subaccount_id,
            fee_recipient: spec.fee_recipient,
            order_type: spec.order_type,
            class,
            side,
            price: spec.price,
            quantity,
            fillable: quantity,
            margin: if reduce_only { Decimal::ZERO } else { spec.margin },
            locked: Decimal::ZERO,
            fee_rate,
            reduce_only,
            trigger_price: spec.trigger_price,
            sequence,
        };

        self.check_capacity(&config, &order, direction)?;

        let hold = required_hold(&config, &order);
        self.state
            .deposits
            .lock(order.subaccount_id, config.hold_denom(side), hold)?;
        order.locked = hold;

        Ok(AdmittedOrder { order, direction })
    }

    fn check_capacity(
        &mut self,
        config: &MarketConfig,
        order: &Order,
        direction: Option<TriggerDirection>,
    ) -> Result<(), EngineError> {
        let conditional = direction.is_some();
        if let Some(slot) = OrderSlot::of(order, conditional) {
            let meta = self.state.metadata.get(order.market_id, order.subaccount_id, order.side);
            if !has_capacity(&meta, slot, config.market_type, self.config.params.max_orders_per_side) {
                return Err(EngineError::ExceedsOrderSideCount {
                    market: order.market_id,
                    subaccount: order.subaccount_id,
                    side: order.side,
                });
            }
        }

        if let Some(direction) = direction {
            let market = self.market(order.market_id)?;
            if order.class == OrderClass::Market && market.conditional.has_market_order(order.subaccount_id, direction) {
                return Err(EngineError::ConditionalMarketOrderAlreadyExists {
                    subaccount: order.subaccount_id,
                });
            }
        } else if order.class == OrderClass::Market && config.is_derivative() && !order.is_atomic() {
            self.claim_block_market_order(order.market_id, order.subaccount_id)?;
        }
        Ok(())
    }

    pub(super) fn claim_block_market_order(
        &mut self,
        market_id: MarketId,
        subaccount_id: SubaccountId,
    ) -> Result<(), EngineError> {
        if !self.state.block_market_orders.insert((market_id, subaccount_id)) {
            return Err(EngineError::MarketOrderAlreadyExists {
                market: market_id,
                subaccount: subaccount_id,
            });
        }
        Ok(())
    }

    fn route_order(&mut self, admitted: AdmittedOrder) -> Result<OrderResult, EngineError> {
        let AdmittedOrder { mut order, direction } = admitted;
        let market_id = order.market_id;

        let placement = if direction.is_some() {
            Placement::Conditional
        } else if order.is_atomic() {
            Placement::Executed
        } else if order.is_post_only() {
            Placement::Resting
        } else {
            Placement::Staged
        };
        self.emit_placed(&order, placement);
        debug!(market = %market_id, order = %order.hash, ?placement, quantity = %order.quantity, "order admitted");

        let mut result = OrderResult {
            order_hash: order.hash,
            placement,
            quantity: order.quantity,
            filled_quantity: Decimal::ZERO,
            average_price: None,
            fills: Vec::new(),
        };

        match (placement, direction) {
            (Placement::Conditional, Some(direction)) => {
                let trigger_price = order.trigger_price.ok_or(EngineError::InvalidOrderType {
                    order_type: order.order_type,
                    reason: "conditional order without trigger price",
                })?;
                self.state.metadata.track(&order, true);
                self.market_mut(market_id)?.conditional.insert(ConditionalOrder {
                    order,
                    trigger_price,
                    direction,
                });
            }
            (Placement::Executed, _) => {
                let limit = Some(order.price);
                let execution = self.execute_taker(market_id, &mut order, ExecutionPhase::Atomic, limit)?;
                if execution.filled_quantity.is_zero() {
                    return Err(EngineError::NoLiquidity(market_id));
                }
                result.filled_quantity = execution.filled_quantity;
                result.average_price = execution.average_price();
                result.fills = execution.fills;
                self.release_untracked(order, CancelReason::Unfilled)?;
            }
            (Placement::Resting, _) => {
                let market = self.market(market_id)?;
                if would_cross(&order, market.book.best_price(order.side.opposite())) {
                    return Err(EngineError::PostOnlyWouldCross);
                }
                self.state.metadata.track(&order, false);
                self.market_mut(market_id)?.book.insert(order);
            }
            _ => {
                self.state.metadata.track(&order, false);
                self.market_mut(market_id)?.transient.push(order);
            }
        }
        Ok(result)
    }

    pub(super) fn emit_placed(&mut self, order: &Order, placement: Placement) {
        self.emit_event(EventPayload::OrderPlaced(OrderPlacedEvent {
            market_id: order.market_id,
            order_hash: order.hash,
            subaccount_id: order.subaccount_id,
            order_type: order.order_type,
            class: order.class,
            price: order.price,
            quantity: order.quantity,
            margin: order.margin,
            reduce_only: order.reduce_only,
            placement,
        }));
    }

    /// Release the hold of an order no store or counter knows about any more.
    /// Emits a cancel for whatever was left unfilled.
    pub(super) fn release_untracked(&mut self, mut order: Order, reason: CancelReason) -> Result<Decimal, EngineError> {
        let unfilled = order.fillable;
        let released = order.release_all();
        let denom = self.market(order.market_id)?.config.hold_denom(order.side).clone();
        self.state.deposits.unlock(order.subaccount_id, &denom, released);
        if !unfilled.is_zero() {
            self.emit_event(EventPayload::OrderCanceled(OrderCanceledEvent {
                market_id: order.market_id,
                order_hash: order.hash,
                subaccount_id: order.subaccount_id,
                reason,
                unfilled,
                released,
            }));
            debug!(market = %order.market_id, order = %order.hash, ?reason, %released, "order canceled");
        }
        Ok(released)
    }

    // 8.6: removal

    /// Remove a live order from wherever it is kept. The flag is true for conditional orders.
    pub(super) fn take_live_order(&mut self, market_id: MarketId, hash: &OrderHash) -> Option<(Order, bool)> {
        let market = self.state.markets.get_mut(&market_id)?;
        if let Some(index) = market.transient_position(hash) {
            return Some((market.transient.remove(index), false));
        }
        if let Some(order) = market.book.remove(hash) {
            return Some((order, false));
        }
        market.conditional.remove(hash).map(|c| (c.order, true))
    }

    /// Drop a taken order: counters, hold and the cancel event. Returns the released hold.
    pub(super) fn release_order(
        &mut self,
        order: Order,
        conditional: bool,
        reason: CancelReason,
    ) -> Result<Decimal, EngineError> {
        self.state.metadata.untrack(&order, conditional);
        self.release_untracked(order, reason)
    }

    /// Drop a taken order without a cancel: it already committed and can no longer execute.
    pub(super) fn invalidate_order(
        &mut self,
        mut order: Order,
        conditional: bool,
        reason: &str,
    ) -> Result<(), EngineError> {
        self.state.metadata.untrack(&order, conditional);
        let released = order.release_all();
        let denom = self.market(order.market_id)?.config.hold_denom(order.side).clone();
        self.state.deposits.unlock(order.subaccount_id, &denom, released);
        warn!(market = %order.market_id, order = %order.hash, reason, "order invalidated");
        self.emit_event(EventPayload::OrderInvalidated(OrderInvalidatedEvent {
            market_id: order.market_id,
            order_hash: order.hash,
            subaccount_id: order.subaccount_id,
            reason: reason.to_string(),
        }));
        Ok(())
    }

    pub(super) fn cancel_order(
        &mut self,
        market_id: MarketId,
        subaccount_id: SubaccountId,
        order_hash: OrderHash,
    ) -> Result<Decimal, EngineError> {
        self.market(market_id)?;
        let owned = self
            .order(market_id, &order_hash)
            .is_some_and(|o| o.subaccount_id == subaccount_id);
        if !owned {
            return Err(EngineError::OrderDoesntExist(order_hash));
        }
        let (order, conditional) = self
            .take_live_order(market_id, &order_hash)
            .ok_or(EngineError::OrderDoesntExist(order_hash))?;
        let reduce_only = order.reduce_only;
        let released = self.release_order(order, conditional, CancelReason::UserRequested)?;
        if !reduce_only {
            self.prune_orphan_reduce_only(market_id, subaccount_id)?;
        }
        Ok(released)
    }

    /// Cancel every order `subaccount_id` has in the market, in any store.
    pub(super) fn cancel_subaccount_orders(
        &mut self,
        market_id: MarketId,
        subaccount_id: SubaccountId,
        reason: CancelReason,
    ) -> Result<Vec<OrderHash>, EngineError> {
        let hashes = self.order_hashes(market_id, |o| o.subaccount_id == subaccount_id)?;
        for hash in &hashes {
            if let Some((order, conditional)) = self.take_live_order(market_id, hash) {
                self.release_order(order, conditional, reason)?;
            }
        }
        Ok(hashes)
    }

    /// Hashes of live orders in the market matching `filter`: staged, resting, then conditional.
    pub(super) fn order_hashes(
        &self,
        market_id: MarketId,
        filter: impl Fn(&Order) -> bool,
    ) -> Result<Vec<OrderHash>, EngineError> {
        let market = self.market(market_id)?;
        Ok(market
            .transient
            .iter()
            .chain(market.book.all_orders())
            .chain(market.conditional.all().into_iter().map(|c| &c.order))
            .filter(|o| filter(o))
            .map(|o| o.hash)
            .collect())
    }

    pub(super) fn has_vanilla_limit_orders(&self, market_id: MarketId, subaccount_id: SubaccountId) -> bool {
        [Side::Buy, Side::Sell].iter().any(|side| {
            self.state
                .metadata
                .get(market_id, subaccount_id, *side)
                .vanilla_limit_orders
                > 0
        })
    }

    /// Reduce-only orders need something to reduce: once the position is gone and no
    /// vanilla limit order could reopen it, they are all canceled.
    pub(super) fn prune_orphan_reduce_only(
        &mut self,
        market_id: MarketId,
        subaccount_id: SubaccountId,
    ) -> Result<usize, EngineError> {
        if !self.market(market_id)?.config.is_derivative()
            || self.state.positions.get(market_id, subaccount_id).is_some()
            || self.has_vanilla_limit_orders(market_id, subaccount_id)
        {
            return Ok(0);
        }
        let hashes = self.order_hashes(market_id, |o| o.subaccount_id == subaccount_id && o.reduce_only)?;
        for hash in &hashes {
            if let Some((order, conditional)) = self.take_live_order(market_id, hash) {
                self.release_order(order, conditional, CancelReason::PositionClosed)?;
            }
        }
        Ok(hashes.len())
    }

    /// Quantity of `subaccount_id`'s position an order on `side` may reduce.
    pub(super) fn reducible_quantity(&self, market_id: MarketId, subaccount_id: SubaccountId, side: Side) -> Decimal {
        match self.state.positions.get(market_id, subaccount_id) {
            Some(position) if position.side != side => position.quantity,
            _ => Decimal::ZERO,
        }
    }

    // 8.7: batch update. cancels first, then creates; each part isolated

    pub(super) fn batch_update(&mut self, origin: Origin, update: BatchUpdate) -> Result<BatchUpdateResult, EngineError> {
        if update
            .limit_orders
            .iter()
            .chain(update.market_orders.iter())
            .any(|spec| spec.order_type.is_atomic())
        {
            return Err(EngineError::AtomicOrderInBatch);
        }

        let subaccount_id = update.subaccount_id;
        let mut result = BatchUpdateResult {
            canceled: Vec::new(),
            cancel_failures: Vec::new(),
            created: Vec::new(),
        };

        for market_id in &update.cancel_all_market_ids {
            match self.isolated(|engine| engine.cancel_subaccount_orders(*market_id, subaccount_id, CancelReason::CancelAll)) {
                Ok(hashes) => result.canceled.extend(hashes),
                Err(err) => warn!(market = %market_id, error = %err, "cancel-all skipped"),
            }
        }

        for cancel in &update.cancels {
            match self.isolated(|engine| engine.cancel_order(cancel.market_id, subaccount_id, cancel.order_hash)) {
                Ok(_) => result.canceled.push(cancel.order_hash),
                Err(err) => result.cancel_failures.push((cancel.order_hash, err)),
            }
        }

        let creates = update
            .limit_orders
            .into_iter()
            .map(|spec| (spec, OrderClass::Limit))
            .chain(update.market_orders.into_iter().map(|spec| (spec, OrderClass::Market)));
        for (spec, class) in creates {
            let created = if spec.subaccount_id != subaccount_id {
                Err(EngineError::InvalidOrderType {
                    order_type: spec.order_type,
                    reason: "order subaccount differs from the batch subaccount",
                })
            } else {
                self.isolated(|engine| engine.create_order(origin, spec, class))
            };
            if let Err(err) = &created {
                debug!(error = %err, "batch create rejected");
            }
            result.created.push(created);
        }
        Ok(result)
    }
}
