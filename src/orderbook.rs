// 2.3: per-market resting book. each side is a BTreeMap keyed so that iteration order
// is fill priority: better price first, then lower sequence. bids store the negated price.

use crate::order::Order;
use crate::types::{MarketId, OrderHash, Price, Side, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

type BookKey = (Decimal, u64);

fn book_key(side: Side, price: Price, sequence: u64) -> BookKey {
    match side {
        Side::Buy => (-price.value(), sequence),
        Side::Sell => (price.value(), sequence),
    }
}

/// Aggregated quantity at one price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub quantity: Decimal,
    pub orders: usize,
}

#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub market_id: Option<MarketId>,
    bids: BTreeMap<BookKey, Order>,
    asks: BTreeMap<BookKey, Order>,
    index: HashMap<OrderHash, (Side, BookKey)>,
}

impl OrderBook {
    pub fn new(market_id: MarketId) -> Self {
        Self {
            market_id: Some(market_id),
            ..Self::default()
        }
    }

    fn side(&self, side: Side) -> &BTreeMap<BookKey, Order> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<BookKey, Order> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    pub fn insert(&mut self, order: Order) {
        let key = book_key(order.side, order.price, order.sequence);
        self.index.insert(order.hash, (order.side, key));
        self.side_mut(order.side).insert(key, order);
    }

    pub fn remove(&mut self, hash: &OrderHash) -> Option<Order> {
        let (side, key) = self.index.remove(hash)?;
        self.side_mut(side).remove(&key)
    }

    pub fn get(&self, hash: &OrderHash) -> Option<&Order> {
        let (side, key) = self.index.get(hash)?;
        self.side(*side).get(key)
    }

    pub fn get_mut(&mut self, hash: &OrderHash) -> Option<&mut Order> {
        let (side, key) = *self.index.get(hash)?;
        self.side_mut(side).get_mut(&key)
    }

    pub fn contains(&self, hash: &OrderHash) -> bool {
        self.index.contains_key(hash)
    }

    /// Highest priority order on `side`.
    pub fn best(&self, side: Side) -> Option<&Order> {
        self.side(side).values().next()
    }

    pub fn best_price(&self, side: Side) -> Option<Price> {
        self.best(side).map(|o| o.price)
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.best_price(Side::Buy)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.best_price(Side::Sell)
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some((bid.value() + ask.value()) / Decimal::TWO)
    }

    /// Orders on `side` in fill priority.
    pub fn orders(&self, side: Side) -> impl Iterator<Item = &Order> {
        self.side(side).values()
    }

    pub fn all_orders(&self) -> impl Iterator<Item = &Order> {
        self.bids.values().chain(self.asks.values())
    }

    pub fn hashes_for(&self, subaccount_id: SubaccountId) -> Vec<OrderHash> {
        self.all_orders()
            .filter(|o| o.subaccount_id == subaccount_id)
            .map(|o| o.hash)
            .collect()
    }

    /// Quantity resting on `side` at prices acceptable to a taker bounded by `limit`.
    pub fn depth_within(&self, side: Side, limit: Option<Price>) -> Decimal {
        self.orders(side)
            .take_while(|o| crate::matching::crosses(side.opposite(), limit, o.price))
            .map(|o| o.fillable)
            .sum()
    }

    pub fn levels(&self, side: Side, depth: usize) -> Vec<PriceLevel> {
        let mut levels: Vec<PriceLevel> = Vec::new();
        for order in self.orders(side) {
            match levels.last_mut() {
                Some(level) if level.price == order.price => {
                    level.quantity += order.fillable;
                    level.orders += 1;
                }
                _ => {
                    if levels.len() == depth {
                        break;
                    }
                    levels.push(PriceLevel {
                        price: order.price,
                        quantity: order.fillable,
                        orders: 1,
                    });
                }
            }
        }
        levels
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Remove and return every order, bids first, each side in priority order.
    pub fn drain(&mut self) -> Vec<Order> {
        self.index.clear();
        let bids = std::mem::take(&mut self.bids);
        let asks = std::mem::take(&mut self.asks);
        bids.into_values().chain(asks.into_values()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{OrderClass, OrderType};
    use rust_decimal_macros::dec;

    fn order(n: u8, side: Side, price: Decimal, qty: Decimal, sequence: u64) -> Order {
        Order {
            hash: OrderHash([n; 32]),
            market_id: MarketId(1),
            subaccount_id: SubaccountId(n as u64),
            fee_recipient: None,
            order_type: if side.is_buy() { OrderType::Buy } else { OrderType::Sell },
            class: OrderClass::Limit,
            side,
            price: Price::new_unchecked(price),
            quantity: qty,
            fillable: qty,
            margin: Decimal::ZERO,
            locked: Decimal::ZERO,
            fee_rate: Decimal::ZERO,
            reduce_only: false,
            trigger_price: None,
            sequence,
        }
    }

    #[test]
    fn bids_prefer_higher_price_then_earlier_sequence() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(order(1, Side::Buy, dec!(100), dec!(1), 1));
        book.insert(order(2, Side::Buy, dec!(101), dec!(1), 2));
        book.insert(order(3, Side::Buy, dec!(101), dec!(1), 3));

        let seq: Vec<u64> = book.orders(Side::Buy).map(|o| o.sequence).collect();
        assert_eq!(seq, vec![2, 3, 1]);
        assert_eq!(book.best_bid(), Some(Price::new_unchecked(dec!(101))));
    }

    #[test]
    fn asks_prefer_lower_price() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(order(1, Side::Sell, dec!(105), dec!(1), 1));
        book.insert(order(2, Side::Sell, dec!(103), dec!(2), 2));
        assert_eq!(book.best_ask(), Some(Price::new_unchecked(dec!(103))));
        assert_eq!(book.depth_within(Side::Sell, Some(Price::new_unchecked(dec!(104)))), dec!(2));
        assert_eq!(book.depth_within(Side::Sell, None), dec!(3));
    }

    #[test]
    fn remove_by_hash_and_levels() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(order(1, Side::Sell, dec!(10), dec!(1), 1));
        book.insert(order(2, Side::Sell, dec!(10), dec!(2), 2));
        book.insert(order(3, Side::Sell, dec!(11), dec!(4), 3));

        let levels = book.levels(Side::Sell, 5);
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].quantity, dec!(3));
        assert_eq!(levels[0].orders, 2);

        let removed = book.remove(&OrderHash([2; 32])).unwrap();
        assert_eq!(removed.sequence, 2);
        assert!(!book.contains(&OrderHash([2; 32])));
        assert_eq!(book.len(), 2);
        assert_eq!(book.mid_price(), None);
    }
}
