// 11.0: every state change produces an event. the log is the audit trail of a block:
// admissions, fills, cancellations, liquidations, lifecycle moves and funding.

use crate::market::MarketStatus;
use crate::matching::ExecutionPhase;
use crate::order::{OrderClass, OrderType};
use crate::types::{Denom, MarketId, OrderHash, Price, Side, SubaccountId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub height: u64,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, height: u64, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            height,
            timestamp,
            payload,
        }
    }

    pub fn market_id(&self) -> Option<MarketId> {
        self.payload.market_id()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    // Order events
    OrderPlaced(OrderPlacedEvent),
    OrderCanceled(OrderCanceledEvent),
    OrderInvalidated(OrderInvalidatedEvent),
    ConditionalTriggered(ConditionalTriggeredEvent),
    Fill(FillEvent),

    // Position events
    PositionUpdated(PositionUpdatedEvent),
    PositionClosed(PositionClosedEvent),
    FundingApplied(FundingAppliedEvent),

    // Risk events
    Liquidation(LiquidationEvent),
    InsuranceDrawdown(InsuranceDrawdownEvent),
    MarketSettled(MarketSettledEvent),

    // Market events
    MarketListed(MarketListedEvent),
    MarketStatusChanged(MarketStatusChangedEvent),
    FeesUpdated(FeesUpdatedEvent),

    // Account events
    Deposit(BalanceEvent),
    Withdrawal(BalanceEvent),
}

impl EventPayload {
    pub fn market_id(&self) -> Option<MarketId> {
        match self {
            EventPayload::OrderPlaced(e) => Some(e.market_id),
            EventPayload::OrderCanceled(e) => Some(e.market_id),
            EventPayload::OrderInvalidated(e) => Some(e.market_id),
            EventPayload::ConditionalTriggered(e) => Some(e.market_id),
            EventPayload::Fill(e) => Some(e.market_id),
            EventPayload::PositionUpdated(e) => Some(e.market_id),
            EventPayload::PositionClosed(e) => Some(e.market_id),
            EventPayload::FundingApplied(e) => Some(e.market_id),
            EventPayload::Liquidation(e) => Some(e.market_id),
            EventPayload::InsuranceDrawdown(e) => Some(e.market_id),
            EventPayload::MarketSettled(e) => Some(e.market_id),
            EventPayload::MarketListed(e) => Some(e.market_id),
            EventPayload::MarketStatusChanged(e) => Some(e.market_id),
            EventPayload::FeesUpdated(e) => Some(e.market_id),
            EventPayload::Deposit(_) | EventPayload::Withdrawal(_) => None,
        }
    }
}

/// Where an admitted order went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    /// Waiting for the end-of-block batch
    Staged,
    /// On the book
    Resting,
    /// In the conditional store
    Conditional,
    /// Executed immediately against the book
    Executed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlacedEvent {
    pub market_id: MarketId,
    pub order_hash: OrderHash,
    pub subaccount_id: SubaccountId,
    pub order_type: OrderType,
    pub class: OrderClass,
    pub price: Price,
    pub quantity: Decimal,
    pub margin: Decimal,
    pub reduce_only: bool,
    pub placement: Placement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    UserRequested,
    CancelAll,
    /// Unfilled part of a market order
    Unfilled,
    NoLiquidity,
    InsufficientFunds,
    Liquidation,
    MarketClosed,
    /// Reduce-only order whose backing position is gone
    PositionClosed,
    /// Isolated failure while executing in the batch
    ExecutionFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCanceledEvent {
    pub market_id: MarketId,
    pub order_hash: OrderHash,
    pub subaccount_id: SubaccountId,
    pub reason: CancelReason,
    pub unfilled: Decimal,
    pub released: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderInvalidatedEvent {
    pub market_id: MarketId,
    pub order_hash: OrderHash,
    pub subaccount_id: SubaccountId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalTriggeredEvent {
    pub market_id: MarketId,
    pub order_hash: OrderHash,
    pub subaccount_id: SubaccountId,
    pub trigger_price: Price,
    pub reference_price: Price,
    pub class: OrderClass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub market_id: MarketId,
    pub phase: ExecutionPhase,
    pub maker_hash: OrderHash,
    pub maker: SubaccountId,
    pub taker_hash: OrderHash,
    pub taker: SubaccountId,
    pub taker_side: Side,
    pub price: Price,
    pub quantity: Decimal,
    pub taker_fee: Decimal,
    /// Negative when the maker earned a rebate
    pub maker_fee: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdatedEvent {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub margin: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub payout: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingAppliedEvent {
    pub market_id: MarketId,
    pub rate: Decimal,
    pub cumulative_funding: Decimal,
    pub mark_price: Price,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub liquidator: SubaccountId,
    pub quantity: Decimal,
    pub bankruptcy_price: Decimal,
    pub average_price: Option<Price>,
    pub payout: Decimal,
    pub liquidator_reward: Decimal,
    pub insurance_contribution: Decimal,
    pub owner_contribution: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsuranceDrawdownEvent {
    pub market_id: MarketId,
    pub amount: Decimal,
    pub shortfall: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSettledEvent {
    pub market_id: MarketId,
    pub price: Decimal,
    pub positions_closed: usize,
    pub deficit: Decimal,
    pub haircut_ratio: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketListedEvent {
    pub market_id: MarketId,
    pub ticker: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStatusChangedEvent {
    pub market_id: MarketId,
    pub from: MarketStatus,
    pub to: MarketStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeesUpdatedEvent {
    pub market_id: MarketId,
    pub maker_fee_rate: Decimal,
    pub taker_fee_rate: Decimal,
    pub atomic_multiplier: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceEvent {
    pub subaccount_id: SubaccountId,
    pub denom: Denom,
    pub amount: Decimal,
    pub new_total: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn events_serialize_and_expose_market() {
        let event = Event::new(
            EventId(7),
            3,
            Timestamp::from_secs(12),
            EventPayload::MarketStatusChanged(MarketStatusChangedEvent {
                market_id: MarketId(2),
                from: MarketStatus::Active,
                to: MarketStatus::Paused,
            }),
        );
        assert_eq!(event.market_id(), Some(MarketId(2)));

        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);

        let deposit = EventPayload::Deposit(BalanceEvent {
            subaccount_id: SubaccountId(1),
            denom: Denom::from("usdt"),
            amount: dec!(10),
            new_total: dec!(10),
        });
        assert_eq!(deposit.market_id(), None);
    }
}
