// 2.4: per (market, subaccount, side) order counters. a cache over the book, the staging
// area and the conditional store. admission caps read it; reconciliation rebuilds it.

use crate::market::MarketType;
use crate::order::{Order, OrderClass};
use crate::types::{MarketId, Side, SubaccountId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderbookMetadata {
    pub vanilla_limit_orders: u32,
    pub reduce_only_limit_orders: u32,
    pub vanilla_conditional_limit_orders: u32,
    pub vanilla_conditional_market_orders: u32,
    pub reduce_only_conditional_orders: u32,
}

impl OrderbookMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn slot_mut(&mut self, slot: OrderSlot) -> &mut u32 {
        match slot {
            OrderSlot::VanillaLimit => &mut self.vanilla_limit_orders,
            OrderSlot::ReduceOnlyLimit => &mut self.reduce_only_limit_orders,
            OrderSlot::VanillaConditionalLimit => &mut self.vanilla_conditional_limit_orders,
            OrderSlot::VanillaConditionalMarket => &mut self.vanilla_conditional_market_orders,
            OrderSlot::ReduceOnlyConditional => &mut self.reduce_only_conditional_orders,
        }
    }
}

/// Which counter an order occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSlot {
    VanillaLimit,
    ReduceOnlyLimit,
    VanillaConditionalLimit,
    VanillaConditionalMarket,
    ReduceOnlyConditional,
}

impl OrderSlot {
    /// Slot of a live order. Non-conditional market orders occupy none.
    pub fn of(order: &Order, conditional: bool) -> Option<Self> {
        match (conditional, order.reduce_only, order.class) {
            (false, _, OrderClass::Market) => None,
            (false, false, OrderClass::Limit) => Some(OrderSlot::VanillaLimit),
            (false, true, OrderClass::Limit) => Some(OrderSlot::ReduceOnlyLimit),
            (true, true, _) => Some(OrderSlot::ReduceOnlyConditional),
            (true, false, OrderClass::Limit) => Some(OrderSlot::VanillaConditionalLimit),
            (true, false, OrderClass::Market) => Some(OrderSlot::VanillaConditionalMarket),
        }
    }
}

/// Per-side cap check. Derivative markets pool vanilla resting and vanilla
/// conditional limit orders; conditional market orders are bounded separately
/// (one per trigger direction) by the conditional store.
pub fn has_capacity(meta: &OrderbookMetadata, slot: OrderSlot, market_type: MarketType, max: u32) -> bool {
    let used = match (market_type, slot) {
        (MarketType::Spot, OrderSlot::VanillaLimit | OrderSlot::ReduceOnlyLimit) => meta.vanilla_limit_orders,
        (MarketType::Spot, _) => {
            meta.vanilla_conditional_limit_orders
                + meta.vanilla_conditional_market_orders
                + meta.reduce_only_conditional_orders
        }
        (_, OrderSlot::VanillaLimit | OrderSlot::VanillaConditionalLimit) => {
            meta.vanilla_limit_orders + meta.vanilla_conditional_limit_orders
        }
        (_, OrderSlot::VanillaConditionalMarket) => return true,
        (_, OrderSlot::ReduceOnlyLimit | OrderSlot::ReduceOnlyConditional) => {
            meta.reduce_only_limit_orders + meta.reduce_only_conditional_orders
        }
    };
    used < max
}

pub type MetadataKey = (MarketId, SubaccountId, Side);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataStore {
    inner: BTreeMap<MetadataKey, OrderbookMetadata>,
}

/// A counter that disagrees with the orders actually present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataMismatch {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub side: Side,
    pub recorded: OrderbookMetadata,
    pub actual: OrderbookMetadata,
}

impl MetadataStore {
    pub fn get(&self, market_id: MarketId, subaccount_id: SubaccountId, side: Side) -> OrderbookMetadata {
        self.inner
            .get(&(market_id, subaccount_id, side))
            .copied()
            .unwrap_or_default()
    }

    pub fn increment(&mut self, market_id: MarketId, subaccount_id: SubaccountId, side: Side, slot: OrderSlot) {
        let meta = self.inner.entry((market_id, subaccount_id, side)).or_default();
        *meta.slot_mut(slot) += 1;
    }

    pub fn decrement(&mut self, market_id: MarketId, subaccount_id: SubaccountId, side: Side, slot: OrderSlot) {
        let key = (market_id, subaccount_id, side);
        if let Some(meta) = self.inner.get_mut(&key) {
            let counter = meta.slot_mut(slot);
            debug_assert!(*counter > 0, "metadata underflow for {slot:?}");
            *counter = counter.saturating_sub(1);
            if meta.is_empty() {
                self.inner.remove(&key);
            }
        }
    }

    /// Record a live order in its slot, if it has one.
    pub fn track(&mut self, order: &Order, conditional: bool) {
        if let Some(slot) = OrderSlot::of(order, conditional) {
            self.increment(order.market_id, order.subaccount_id, order.side, slot);
        }
    }

    pub fn untrack(&mut self, order: &Order, conditional: bool) {
        if let Some(slot) = OrderSlot::of(order, conditional) {
            self.decrement(order.market_id, order.subaccount_id, order.side, slot);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetadataKey, &OrderbookMetadata)> {
        self.inner.iter()
    }

    /// Compare against counters rebuilt from the true order set.
    pub fn reconcile(&self, actual: &MetadataStore) -> Vec<MetadataMismatch> {
        let mut keys: Vec<MetadataKey> = self.inner.keys().copied().collect();
        keys.extend(actual.inner.keys().copied());
        keys.sort();
        keys.dedup();

        keys.into_iter()
            .filter_map(|(market_id, subaccount_id, side)| {
                let recorded = self.get(market_id, subaccount_id, side);
                let actual = actual.get(market_id, subaccount_id, side);
                (recorded != actual).then_some(MetadataMismatch {
                    market_id,
                    subaccount_id,
                    side,
                    recorded,
                    actual,
                })
            })
            .collect()
    }
}
