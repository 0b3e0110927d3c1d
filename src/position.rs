// 4.0: open position tracking. pnl = sign * quantity * (price - entry).
// 4.1 has increase/reduce/flip logic at the bottom. quantity is never negative: the side carries the sign.

use crate::fees::{pro_rata, truncate};
use crate::types::{MarketId, Side, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    // Buy = long, Sell = short
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub margin: Decimal,
    pub cumulative_funding_entry: Decimal,
}

impl Position {
    pub fn new(side: Side, quantity: Decimal, entry_price: Decimal, margin: Decimal, cumulative_funding: Decimal) -> Self {
        Self {
            side,
            quantity,
            entry_price,
            margin,
            cumulative_funding_entry: cumulative_funding,
        }
    }

    pub fn is_long(&self) -> bool {
        self.side.is_buy()
    }

    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        self.side.sign() * self.quantity * (price - self.entry_price)
    }

    // funding owed since entry. positive = position pays
    pub fn pending_funding(&self, cumulative_funding: Decimal) -> Decimal {
        self.side.sign() * self.quantity * (cumulative_funding - self.cumulative_funding_entry)
    }

    /// 4.1: margin + pnl - funding. this vs maintenance determines liquidation.
    pub fn equity_at(&self, price: Decimal, cumulative_funding: Decimal) -> Decimal {
        self.margin + self.pnl_at(price) - self.pending_funding(cumulative_funding)
    }

    /// Settle pending funding into margin. Returns the amount paid (negative = received).
    pub fn apply_funding(&mut self, cumulative_funding: Decimal) -> Decimal {
        let payment = truncate(self.pending_funding(cumulative_funding));
        self.margin -= payment;
        self.cumulative_funding_entry = cumulative_funding;
        payment
    }

    /// Price at which margin is exhausted.
    pub fn bankruptcy_price(&self) -> Decimal {
        if self.quantity.is_zero() {
            return self.entry_price;
        }
        let per_unit = self.margin / self.quantity;
        match self.side {
            Side::Buy => self.entry_price - per_unit,
            Side::Sell => self.entry_price + per_unit,
        }
    }

    pub fn notional_at(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    pub fn is_liquidatable(&self, mark: Decimal, maintenance_margin_ratio: Decimal, cumulative_funding: Decimal) -> bool {
        self.equity_at(mark, cumulative_funding) < maintenance_margin_ratio * self.notional_at(mark)
    }

    /// Value locked by the position measured at price zero. Summed over a
    /// market this is constant under trading, which makes it a conservation check.
    pub fn locked_value(&self) -> Decimal {
        self.margin - self.side.sign() * self.quantity * self.entry_price
            + self.side.sign() * self.quantity * self.cumulative_funding_entry
    }
}

/// Effect of one fill on the trader's position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    // margin + pnl released by the closed part
    pub payout: Decimal,
    // order margin moved into the position for the opened part
    pub margin_added: Decimal,
    pub closed_quantity: Decimal,
    pub opened_quantity: Decimal,
    pub funding_paid: Decimal,
}

impl TradeOutcome {
    pub fn realized_pnl(&self, margin_released: Decimal) -> Decimal {
        self.payout - margin_released
    }
}

/// 4.2: apply a fill of `quantity` at `price` on `side`, carrying `order_margin`
/// for the whole fill. Reduces first, then opens any remainder the other way.
pub fn apply_trade(
    existing: Option<Position>,
    side: Side,
    quantity: Decimal,
    price: Decimal,
    order_margin: Decimal,
    cumulative_funding: Decimal,
) -> (Option<Position>, TradeOutcome) {
    let Some(mut position) = existing else {
        let opened = Position::new(side, quantity, price, order_margin, cumulative_funding);
        return (
            Some(opened),
            TradeOutcome {
                margin_added: order_margin,
                opened_quantity: quantity,
                ..TradeOutcome::default()
            },
        );
    };

    let funding_paid = position.apply_funding(cumulative_funding);

    if position.side == side {
        let new_quantity = position.quantity + quantity;
        position.entry_price =
            truncate((position.quantity * position.entry_price + quantity * price) / new_quantity);
        position.quantity = new_quantity;
        position.margin += order_margin;
        return (
            Some(position),
            TradeOutcome {
                margin_added: order_margin,
                opened_quantity: quantity,
                funding_paid,
                ..TradeOutcome::default()
            },
        );
    }

    let closed = quantity.min(position.quantity);
    let pnl = position.side.sign() * closed * (price - position.entry_price);
    let margin_released = pro_rata(position.margin, closed, position.quantity);
    position.quantity -= closed;
    position.margin -= margin_released;

    let opened = quantity - closed;
    let mut outcome = TradeOutcome {
        payout: margin_released + pnl,
        closed_quantity: closed,
        opened_quantity: opened,
        funding_paid,
        ..TradeOutcome::default()
    };

    if !position.quantity.is_zero() {
        return (Some(position), outcome);
    }
    if opened.is_zero() {
        return (None, outcome);
    }

    let flipped_margin = pro_rata(order_margin, opened, quantity);
    outcome.margin_added = flipped_margin;
    (
        Some(Position::new(side, opened, price, flipped_margin, cumulative_funding)),
        outcome,
    )
}

/// Positions keyed by (market, subaccount). At most one per key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Positions {
    inner: BTreeMap<(MarketId, SubaccountId), Position>,
}

impl Positions {
    pub fn get(&self, market_id: MarketId, subaccount_id: SubaccountId) -> Option<&Position> {
        self.inner.get(&(market_id, subaccount_id))
    }

    pub fn get_mut(&mut self, market_id: MarketId, subaccount_id: SubaccountId) -> Option<&mut Position> {
        self.inner.get_mut(&(market_id, subaccount_id))
    }

    pub fn set(&mut self, market_id: MarketId, subaccount_id: SubaccountId, position: Option<Position>) {
        match position {
            Some(p) if !p.quantity.is_zero() => {
                self.inner.insert((market_id, subaccount_id), p);
            }
            _ => {
                self.inner.remove(&(market_id, subaccount_id));
            }
        }
    }

    pub fn remove(&mut self, market_id: MarketId, subaccount_id: SubaccountId) -> Option<Position> {
        self.inner.remove(&(market_id, subaccount_id))
    }

    /// Positions in `market_id`, ordered by subaccount.
    pub fn in_market(&self, market_id: MarketId) -> Vec<(SubaccountId, Position)> {
        self.inner
            .range((market_id, SubaccountId(0))..=(market_id, SubaccountId(u64::MAX)))
            .map(|((_, sub), p)| (*sub, p.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(MarketId, SubaccountId), &Position)> {
        self.inner.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Long quantity minus short quantity. Zero for every derivative market.
    pub fn net_quantity(&self, market_id: MarketId) -> Decimal {
        self.in_market(market_id)
            .iter()
            .map(|(_, p)| p.side.sign() * p.quantity)
            .sum()
    }
}
