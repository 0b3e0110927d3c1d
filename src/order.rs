// 2.0: order types. OrderSpec is what a user submits, Order is what the engine keeps alive
// (staged, resting, or wrapped by a conditional order). the book lives in orderbook.rs.

use crate::types::{MarketId, OrderHash, Price, Side, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const ORDER_HASH_DOMAIN: &[u8] = b"exchange-core/order/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Buy,
    Sell,
    StopBuy,
    StopSell,
    TakeBuy,
    TakeSell,
    BuyPostOnly,
    SellPostOnly,
    BuyAtomic,
    SellAtomic,
}

// stop triggers on adverse moves, take on favorable ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    Stop,
    Take,
}

impl OrderType {
    pub fn side(&self) -> Side {
        match self {
            OrderType::Buy
            | OrderType::StopBuy
            | OrderType::TakeBuy
            | OrderType::BuyPostOnly
            | OrderType::BuyAtomic => Side::Buy,
            OrderType::Sell
            | OrderType::StopSell
            | OrderType::TakeSell
            | OrderType::SellPostOnly
            | OrderType::SellAtomic => Side::Sell,
        }
    }

    pub fn trigger_kind(&self) -> Option<TriggerKind> {
        match self {
            OrderType::StopBuy | OrderType::StopSell => Some(TriggerKind::Stop),
            OrderType::TakeBuy | OrderType::TakeSell => Some(TriggerKind::Take),
            _ => None,
        }
    }

    pub fn is_conditional(&self) -> bool {
        self.trigger_kind().is_some()
    }

    pub fn is_post_only(&self) -> bool {
        matches!(self, OrderType::BuyPostOnly | OrderType::SellPostOnly)
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self, OrderType::BuyAtomic | OrderType::SellAtomic)
    }

    fn code(&self) -> u8 {
        match self {
            OrderType::Buy => 1,
            OrderType::Sell => 2,
            OrderType::StopBuy => 3,
            OrderType::StopSell => 4,
            OrderType::TakeBuy => 5,
            OrderType::TakeSell => 6,
            OrderType::BuyPostOnly => 7,
            OrderType::SellPostOnly => 8,
            OrderType::BuyAtomic => 9,
            OrderType::SellAtomic => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OrderClass {
    // ordering matters: market orders sort ahead of limit orders in a batch
    Market,
    Limit,
}

/// 2.1: order as submitted. for market orders `price` is the worst acceptable price.
/// zero margin on a derivative order means reduce-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub fee_recipient: Option<SubaccountId>,
    pub order_type: OrderType,
    pub price: Price,
    pub quantity: Decimal,
    pub margin: Decimal,
    pub trigger_price: Option<Price>,
}

impl OrderSpec {
    pub fn new(
        market_id: MarketId,
        subaccount_id: SubaccountId,
        order_type: OrderType,
        price: Price,
        quantity: Decimal,
    ) -> Self {
        Self {
            market_id,
            subaccount_id,
            fee_recipient: None,
            order_type,
            price,
            quantity,
            margin: Decimal::ZERO,
            trigger_price: None,
        }
    }

    pub fn with_margin(mut self, margin: Decimal) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_trigger(mut self, trigger_price: Price) -> Self {
        self.trigger_price = Some(trigger_price);
        self
    }

    pub fn with_fee_recipient(mut self, recipient: SubaccountId) -> Self {
        self.fee_recipient = Some(recipient);
        self
    }

    pub fn side(&self) -> Side {
        self.order_type.side()
    }

    pub fn notional(&self) -> Decimal {
        self.price.value() * self.quantity
    }
}

/// Content hash of a submission. The nonce makes identical resubmissions distinct.
pub fn compute_order_hash(spec: &OrderSpec, class: OrderClass, nonce: u64) -> OrderHash {
    let mut hasher = Sha256::new();
    hasher.update(ORDER_HASH_DOMAIN);
    hasher.update(spec.market_id.0.to_be_bytes());
    hasher.update(spec.subaccount_id.0.to_be_bytes());
    hasher.update(nonce.to_be_bytes());
    hasher.update([spec.order_type.code(), class as u8]);
    hasher.update(spec.price.value().normalize().to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(spec.quantity.normalize().to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(spec.margin.normalize().to_string().as_bytes());
    if let Some(trigger) = spec.trigger_price {
        hasher.update(b"|");
        hasher.update(trigger.value().normalize().to_string().as_bytes());
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    OrderHash(out)
}

/// 2.2: a live order. `locked` is what is still held in the owner's deposit for
/// the unfilled quantity, `margin` the position margin still attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub hash: OrderHash,
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub fee_recipient: Option<SubaccountId>,
    pub order_type: OrderType,
    pub class: OrderClass,
    pub side: Side,
    pub price: Price,
    pub quantity: Decimal,
    pub fillable: Decimal,
    pub margin: Decimal,
    pub locked: Decimal,
    pub fee_rate: Decimal,
    pub reduce_only: bool,
    pub trigger_price: Option<Price>,
    pub sequence: u64,
}

/// What a partial fill takes out of an order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OrderTake {
    pub margin: Decimal,
    pub released: Decimal,
}

impl Order {
    pub fn is_filled(&self) -> bool {
        self.fillable.is_zero()
    }

    pub fn is_post_only(&self) -> bool {
        self.order_type.is_post_only()
    }

    pub fn is_atomic(&self) -> bool {
        self.order_type.is_atomic()
    }

    pub fn filled(&self) -> Decimal {
        self.quantity - self.fillable
    }

    /// Consume `quantity` from the order, returning the proportional margin and hold.
    pub fn take(&mut self, quantity: Decimal) -> OrderTake {
        let quantity = quantity.min(self.fillable);
        let margin = crate::fees::pro_rata(self.margin, quantity, self.fillable);
        let released = crate::fees::pro_rata(self.locked, quantity, self.fillable);
        self.fillable -= quantity;
        self.margin -= margin;
        self.locked -= released;
        OrderTake { margin, released }
    }

    /// Shrink the unfilled quantity. Returns the hold released by the shrink.
    pub fn resize(&mut self, new_fillable: Decimal) -> Decimal {
        if new_fillable >= self.fillable {
            return Decimal::ZERO;
        }
        let cut = self.fillable - new_fillable;
        let taken = self.take(cut);
        self.quantity -= cut;
        taken.released
    }

    /// Release everything still held. Used on cancel and on market-order remainders.
    pub fn release_all(&mut self) -> Decimal {
        let released = self.locked;
        self.locked = Decimal::ZERO;
        self.margin = Decimal::ZERO;
        released
    }
}
