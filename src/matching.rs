//! Pure matching rules shared by the atomic, batch and liquidation paths.
//!
//! The engine owns the loop that walks the book because reduce-only clipping
//! needs live position state; everything that does not need engine state lives here.

use crate::order::Order;
use crate::types::{OrderHash, Price, Side, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Selects fee treatment and payout routing for a taker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionPhase {
    /// Immediate execution during transaction delivery, taker fee scaled by the atomic multiplier.
    Atomic,
    /// End-of-block batch matching of staged market and limit orders.
    Batch,
    /// Closing a liquidated position: taker pays no fee, payout goes to the waterfall.
    Liquidation,
}

impl ExecutionPhase {
    pub fn charges_taker(&self) -> bool {
        !matches!(self, ExecutionPhase::Liquidation)
    }
}

/// Whether a taker on `taker_side` bounded by `limit` accepts a maker at `maker_price`.
/// `None` means unbounded.
pub fn crosses(taker_side: Side, limit: Option<Price>, maker_price: Price) -> bool {
    match (taker_side, limit) {
        (_, None) => true,
        (Side::Buy, Some(limit)) => maker_price <= limit,
        (Side::Sell, Some(limit)) => maker_price >= limit,
    }
}

/// Would resting `order` immediately cross the best opposite price?
pub fn would_cross(order: &Order, best_opposite: Option<Price>) -> bool {
    best_opposite.is_some_and(|best| crosses(order.side, Some(order.price), best))
}

/// One executed match, printed at the maker's price or at a batch clearing price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub maker_hash: OrderHash,
    pub maker_subaccount: SubaccountId,
    pub taker_hash: OrderHash,
    pub taker_subaccount: SubaccountId,
    pub taker_side: Side,
    pub price: Price,
    pub quantity: Decimal,
    pub taker_fee: Decimal,
    pub maker_fee: Decimal,
}

impl Fill {
    pub fn notional(&self) -> Decimal {
        self.price.value() * self.quantity
    }
}

/// Outcome of walking the book with one taker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TakerExecution {
    pub fills: Vec<Fill>,
    pub filled_quantity: Decimal,
    pub notional: Decimal,
    pub fees_paid: Decimal,
    /// Sum of position payouts routed back to the caller (liquidation phase only).
    pub payout: Decimal,
}

impl TakerExecution {
    pub fn record(&mut self, fill: Fill) {
        self.filled_quantity += fill.quantity;
        self.notional += fill.notional();
        self.fees_paid += fill.taker_fee;
        self.fills.push(fill);
    }

    pub fn average_price(&self) -> Option<Price> {
        if self.filled_quantity.is_zero() {
            None
        } else {
            Price::new(self.notional / self.filled_quantity)
        }
    }
}

/// One pairing inside a batch cross, as indices into the sorted buy and sell lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossMatch {
    pub buy: usize,
    pub sell: usize,
    pub quantity: Decimal,
}

/// Staged limit orders that cross each other within one block.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchCross {
    pub clearing_price: Price,
    pub matches: Vec<CrossMatch>,
}

impl BatchCross {
    pub fn quantity(&self) -> Decimal {
        self.matches.iter().map(|m| m.quantity).sum()
    }
}

/// Pair staged buys (best bid first) against staged sells (best ask first)
/// while they cross. Every pairing prints at one clearing price: the midpoint
/// of the last crossing buy and the last crossing sell.
pub fn plan_batch_cross(buys: &[Order], sells: &[Order]) -> Option<BatchCross> {
    let mut matches = Vec::new();
    let (mut b, mut s) = (0, 0);
    let mut buy_left = buys.first().map_or(Decimal::ZERO, |o| o.fillable);
    let mut sell_left = sells.first().map_or(Decimal::ZERO, |o| o.fillable);
    let mut marginal = None;

    while b < buys.len() && s < sells.len() {
        let (buy, sell) = (&buys[b], &sells[s]);
        if buy.price < sell.price {
            break;
        }
        let quantity = buy_left.min(sell_left);
        if !quantity.is_zero() {
            matches.push(CrossMatch { buy: b, sell: s, quantity });
            marginal = Some((buy.price, sell.price));
        }
        buy_left -= quantity;
        sell_left -= quantity;
        if buy_left.is_zero() {
            b += 1;
            buy_left = buys.get(b).map_or(Decimal::ZERO, |o| o.fillable);
        }
        if sell_left.is_zero() {
            s += 1;
            sell_left = sells.get(s).map_or(Decimal::ZERO, |o| o.fillable);
        }
    }

    let (buy_price, sell_price) = marginal?;
    let clearing_price = Price::new((buy_price.value() + sell_price.value()) / Decimal::TWO)?;
    Some(BatchCross { clearing_price, matches })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn p(v: Decimal) -> Price {
        Price::new_unchecked(v)
    }

    #[test]
    fn crossing_rules() {
        assert!(crosses(Side::Buy, Some(p(dec!(10))), p(dec!(10))));
        assert!(!crosses(Side::Buy, Some(p(dec!(10))), p(dec!(10.1))));
        assert!(crosses(Side::Sell, Some(p(dec!(10))), p(dec!(11))));
        assert!(!crosses(Side::Sell, Some(p(dec!(10))), p(dec!(9))));
        assert!(crosses(Side::Sell, None, p(dec!(0.01))));
    }

    fn staged(n: u8, side: Side, price: Decimal, quantity: Decimal) -> Order {
        Order {
            hash: OrderHash([n; 32]),
            market_id: crate::types::MarketId(1),
            subaccount_id: SubaccountId(n as u64),
            fee_recipient: None,
            order_type: match side {
                Side::Buy => crate::order::OrderType::Buy,
                Side::Sell => crate::order::OrderType::Sell,
            },
            class: crate::order::OrderClass::Limit,
            side,
            price: p(price),
            quantity,
            fillable: quantity,
            margin: Decimal::ZERO,
            locked: Decimal::ZERO,
            fee_rate: Decimal::ZERO,
            reduce_only: false,
            trigger_price: None,
            sequence: n as u64,
        }
    }

    #[test]
    fn batch_cross_clears_at_marginal_midpoint() {
        let buys = vec![
            staged(1, Side::Buy, dec!(2000), dec!(2)),
            staged(2, Side::Buy, dec!(1985), dec!(3)),
            staged(3, Side::Buy, dec!(1967), dec!(2)),
        ];
        let sells = vec![
            staged(4, Side::Sell, dec!(1900), dec!(3)),
            staged(5, Side::Sell, dec!(1918), dec!(1)),
            staged(6, Side::Sell, dec!(1930), dec!(2)),
        ];
        let cross = plan_batch_cross(&buys, &sells).unwrap();
        assert_eq!(cross.clearing_price, p(dec!(1948.5)));
        assert_eq!(cross.quantity(), dec!(6));
        let filled = |i: usize| -> Decimal { cross.matches.iter().filter(|m| m.buy == i).map(|m| m.quantity).sum() };
        assert_eq!((filled(0), filled(1), filled(2)), (dec!(2), dec!(3), dec!(1)));
    }

    #[test]
    fn batch_cross_needs_overlap() {
        let buys = vec![staged(1, Side::Buy, dec!(9), dec!(1))];
        let sells = vec![staged(2, Side::Sell, dec!(10), dec!(1))];
        assert_eq!(plan_batch_cross(&buys, &sells), None);
        assert_eq!(plan_batch_cross(&buys, &[]), None);
    }

    #[test]
    fn average_price_over_fills() {
        let mut exec = TakerExecution::default();
        for (price, qty) in [(dec!(10), dec!(1)), (dec!(12), dec!(1))] {
            exec.record(Fill {
                maker_hash: OrderHash([1; 32]),
                maker_subaccount: SubaccountId(1),
                taker_hash: OrderHash([2; 32]),
                taker_subaccount: SubaccountId(2),
                taker_side: Side::Buy,
                price: p(price),
                quantity: qty,
                taker_fee: dec!(0.1),
                maker_fee: Decimal::ZERO,
            });
        }
        assert_eq!(exec.average_price(), Some(p(dec!(11))));
        assert_eq!(exec.fees_paid, dec!(0.2));
        assert!(!ExecutionPhase::Liquidation.charges_taker());
    }
}
