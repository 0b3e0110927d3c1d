//! Conditional orders: stop and take variants of limit and market orders.
//!
//! Conditional orders are stored separately from the order book and only become
//! live when the reference price crosses their trigger. Each order is indexed by
//! trigger tier in the direction it waits for, so a block's trigger pass is a
//! range scan rather than a full walk.

use crate::order::{Order, OrderClass, OrderType, TriggerKind};
use crate::types::{MarketId, OrderHash, Price, Side, SubaccountId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Which way the reference price has to move for the order to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TriggerDirection {
    /// Fires when the reference price is at or above the trigger.
    Higher,
    /// Fires when the reference price is at or below the trigger.
    Lower,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("order type {0:?} is not conditional")]
    NotConditional(OrderType),

    #[error("trigger price {trigger} equals the mark price")]
    EqualsMark { trigger: Price },

    #[error("{order_type:?} requires trigger {expected} mark price {mark}, got {trigger}")]
    WrongSideOfMark {
        order_type: OrderType,
        expected: &'static str,
        trigger: Price,
        mark: Price,
    },
}

/// Check a trigger against the current mark and derive its direction.
///
/// Stop buys and take sells wait for the price to rise; take buys and stop sells
/// wait for it to fall.
pub fn validate_trigger(order_type: OrderType, trigger: Price, mark: Price) -> Result<TriggerDirection, TriggerError> {
    let kind = order_type
        .trigger_kind()
        .ok_or(TriggerError::NotConditional(order_type))?;
    if trigger == mark {
        return Err(TriggerError::EqualsMark { trigger });
    }
    let required = match (kind, order_type.side()) {
        (TriggerKind::Stop, Side::Buy) | (TriggerKind::Take, Side::Sell) => TriggerDirection::Higher,
        (TriggerKind::Take, Side::Buy) | (TriggerKind::Stop, Side::Sell) => TriggerDirection::Lower,
    };
    let actual = if trigger > mark {
        TriggerDirection::Higher
    } else {
        TriggerDirection::Lower
    };
    if actual != required {
        return Err(TriggerError::WrongSideOfMark {
            order_type,
            expected: if required == TriggerDirection::Higher { "above" } else { "below" },
            trigger,
            mark,
        });
    }
    Ok(required)
}

/// A conditional order waiting to be triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalOrder {
    pub order: Order,
    pub trigger_price: Price,
    pub direction: TriggerDirection,
}

impl ConditionalOrder {
    pub fn hash(&self) -> OrderHash {
        self.order.hash
    }

    pub fn subaccount_id(&self) -> SubaccountId {
        self.order.subaccount_id
    }

    pub fn class(&self) -> OrderClass {
        self.order.class
    }

    pub fn should_trigger(&self, reference: Price) -> bool {
        match self.direction {
            TriggerDirection::Higher => reference >= self.trigger_price,
            TriggerDirection::Lower => reference <= self.trigger_price,
        }
    }
}

type TierKey = (Price, u64);

/// Per-market store of pending conditional orders.
#[derive(Debug, Clone, Default)]
pub struct ConditionalOrderBook {
    pub market_id: Option<MarketId>,
    orders: HashMap<OrderHash, ConditionalOrder>,
    higher: BTreeMap<TierKey, OrderHash>,
    lower: BTreeMap<TierKey, OrderHash>,
}

impl ConditionalOrderBook {
    pub fn new(market_id: MarketId) -> Self {
        Self {
            market_id: Some(market_id),
            ..Self::default()
        }
    }

    fn tier_mut(&mut self, direction: TriggerDirection) -> &mut BTreeMap<TierKey, OrderHash> {
        match direction {
            TriggerDirection::Higher => &mut self.higher,
            TriggerDirection::Lower => &mut self.lower,
        }
    }

    pub fn insert(&mut self, order: ConditionalOrder) {
        let key = (order.trigger_price, order.order.sequence);
        let hash = order.hash();
        self.tier_mut(order.direction).insert(key, hash);
        self.orders.insert(hash, order);
    }

    pub fn remove(&mut self, hash: &OrderHash) -> Option<ConditionalOrder> {
        let order = self.orders.remove(hash)?;
        let key = (order.trigger_price, order.order.sequence);
        self.tier_mut(order.direction).remove(&key);
        Some(order)
    }

    pub fn get(&self, hash: &OrderHash) -> Option<&ConditionalOrder> {
        self.orders.get(hash)
    }

    pub fn contains(&self, hash: &OrderHash) -> bool {
        self.orders.contains_key(hash)
    }

    /// Orders belonging to `subaccount_id`, in submission order.
    pub fn for_subaccount(&self, subaccount_id: SubaccountId) -> Vec<&ConditionalOrder> {
        let mut out: Vec<&ConditionalOrder> = self
            .orders
            .values()
            .filter(|o| o.subaccount_id() == subaccount_id)
            .collect();
        out.sort_by_key(|o| o.order.sequence);
        out
    }

    pub fn has_market_order(&self, subaccount_id: SubaccountId, direction: TriggerDirection) -> bool {
        self.orders.values().any(|o| {
            o.subaccount_id() == subaccount_id && o.direction == direction && o.class() == OrderClass::Market
        })
    }

    /// Hashes of orders that fire at `reference`, market orders first, then by submission order.
    pub fn triggered(&self, reference: Price) -> Vec<OrderHash> {
        let mut fired: Vec<&ConditionalOrder> = Vec::new();
        for hash in self.higher.range(..=(reference, u64::MAX)).map(|(_, h)| h) {
            if let Some(order) = self.orders.get(hash) {
                fired.push(order);
            }
        }
        for hash in self.lower.range((reference, 0)..).map(|(_, h)| h) {
            if let Some(order) = self.orders.get(hash) {
                fired.push(order);
            }
        }
        fired.sort_by_key(|o| (o.class(), o.order.sequence));
        fired.into_iter().map(|o| o.hash()).collect()
    }

    /// All orders in submission order.
    pub fn all(&self) -> Vec<&ConditionalOrder> {
        let mut out: Vec<&ConditionalOrder> = self.orders.values().collect();
        out.sort_by_key(|o| o.order.sequence);
        out
    }

    pub fn drain(&mut self) -> Vec<ConditionalOrder> {
        self.higher.clear();
        self.lower.clear();
        let mut out: Vec<ConditionalOrder> = self.orders.drain().map(|(_, o)| o).collect();
        out.sort_by_key(|o| o.order.sequence);
        out
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn p(v: Decimal) -> Price {
        Price::new_unchecked(v)
    }

    fn conditional(n: u8, order_type: OrderType, class: OrderClass, trigger: Decimal, mark: Decimal, seq: u64) -> ConditionalOrder {
        let trigger = p(trigger);
        let direction = validate_trigger(order_type, trigger, p(mark)).unwrap();
        ConditionalOrder {
            order: Order {
                hash: OrderHash([n; 32]),
                market_id: MarketId(1),
                subaccount_id: SubaccountId(1),
                fee_recipient: None,
                order_type,
                class,
                side: order_type.side(),
                price: p(dec!(100)),
                quantity: dec!(1),
                fillable: dec!(1),
                margin: dec!(10),
                locked: dec!(10),
                fee_rate: Decimal::ZERO,
                reduce_only: false,
                trigger_price: Some(trigger),
                sequence: seq,
            },
            trigger_price: trigger,
            direction,
        }
    }

    #[test]
    fn trigger_direction_rules() {
        let mark = p(dec!(100));
        assert_eq!(validate_trigger(OrderType::StopBuy, p(dec!(110)), mark), Ok(TriggerDirection::Higher));
        assert_eq!(validate_trigger(OrderType::TakeSell, p(dec!(110)), mark), Ok(TriggerDirection::Higher));
        assert_eq!(validate_trigger(OrderType::TakeBuy, p(dec!(90)), mark), Ok(TriggerDirection::Lower));
        assert_eq!(validate_trigger(OrderType::StopSell, p(dec!(90)), mark), Ok(TriggerDirection::Lower));

        assert!(matches!(
            validate_trigger(OrderType::StopBuy, p(dec!(90)), mark),
            Err(TriggerError::WrongSideOfMark { .. })
        ));
        assert!(matches!(
            validate_trigger(OrderType::TakeBuy, p(dec!(100)), mark),
            Err(TriggerError::EqualsMark { .. })
        ));
        assert!(matches!(
            validate_trigger(OrderType::Buy, p(dec!(110)), mark),
            Err(TriggerError::NotConditional(_))
        ));
    }

    #[test]
    fn triggered_orders_market_first_then_fifo() {
        let mut book = ConditionalOrderBook::new(MarketId(1));
        book.insert(conditional(1, OrderType::StopBuy, OrderClass::Limit, dec!(110), dec!(100), 1));
        book.insert(conditional(2, OrderType::StopBuy, OrderClass::Market, dec!(110), dec!(100), 2));
        book.insert(conditional(3, OrderType::TakeSell, OrderClass::Limit, dec!(105), dec!(100), 3));
        book.insert(conditional(4, OrderType::StopBuy, OrderClass::Limit, dec!(120), dec!(100), 4));
        book.insert(conditional(5, OrderType::StopSell, OrderClass::Limit, dec!(90), dec!(100), 5));

        assert!(book.triggered(p(dec!(104))).is_empty());

        let fired = book.triggered(p(dec!(110)));
        assert_eq!(fired, vec![OrderHash([2; 32]), OrderHash([1; 32]), OrderHash([3; 32])]);

        let fired_low = book.triggered(p(dec!(90)));
        assert_eq!(fired_low, vec![OrderHash([5; 32])]);
    }

    #[test]
    fn remove_clears_tier_index() {
        let mut book = ConditionalOrderBook::new(MarketId(1));
        book.insert(conditional(1, OrderType::StopBuy, OrderClass::Market, dec!(110), dec!(100), 1));
        assert!(book.has_market_order(SubaccountId(1), TriggerDirection::Higher));
        assert!(!book.has_market_order(SubaccountId(1), TriggerDirection::Lower));

        book.remove(&OrderHash([1; 32])).unwrap();
        assert!(book.triggered(p(dec!(200))).is_empty());
        assert!(book.is_empty());
    }
}
