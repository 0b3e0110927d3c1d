//! Messages delivered to the engine and governance updates applied to it.
//!
//! Each [`Msg`] is handled atomically by [`crate::Engine::deliver`]: it either
//! applies completely or leaves no trace. Governance updates bypass the
//! message path and are applied between blocks.

use crate::config::{AtomicAccess, ExchangeParams};
use crate::market::MarketConfig;
use crate::order::OrderSpec;
use crate::types::{Denom, MarketId, OrderHash, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Who sent a message. Atomic order access is gated on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Origin {
    #[default]
    User,
    SmartContract,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRef {
    pub market_id: MarketId,
    pub order_hash: OrderHash,
}

/// Cancels and creates for one subaccount. Cancels run first, then creates.
/// Atomic orders are not allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchUpdate {
    pub subaccount_id: SubaccountId,
    pub cancel_all_market_ids: Vec<MarketId>,
    pub cancels: Vec<OrderRef>,
    pub limit_orders: Vec<OrderSpec>,
    pub market_orders: Vec<OrderSpec>,
}

impl BatchUpdate {
    pub fn new(subaccount_id: SubaccountId) -> Self {
        Self {
            subaccount_id,
            cancel_all_market_ids: Vec::new(),
            cancels: Vec::new(),
            limit_orders: Vec::new(),
            market_orders: Vec::new(),
        }
    }

    pub fn cancel_all(mut self, market_id: MarketId) -> Self {
        self.cancel_all_market_ids.push(market_id);
        self
    }

    pub fn cancel(mut self, market_id: MarketId, order_hash: OrderHash) -> Self {
        self.cancels.push(OrderRef { market_id, order_hash });
        self
    }

    pub fn limit(mut self, spec: OrderSpec) -> Self {
        self.limit_orders.push(spec);
        self
    }

    pub fn market(mut self, spec: OrderSpec) -> Self {
        self.market_orders.push(spec);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Msg {
    Deposit {
        subaccount_id: SubaccountId,
        denom: Denom,
        amount: Decimal,
    },
    Withdraw {
        subaccount_id: SubaccountId,
        denom: Denom,
        amount: Decimal,
    },
    CreateLimitOrder(OrderSpec),
    CreateMarketOrder(OrderSpec),
    CancelOrder {
        market_id: MarketId,
        subaccount_id: SubaccountId,
        order_hash: OrderHash,
    },
    BatchUpdateOrders(BatchUpdate),
    LiquidatePosition {
        market_id: MarketId,
        subaccount_id: SubaccountId,
        liquidator: SubaccountId,
        order: Option<OrderSpec>,
    },
}

impl Msg {
    pub fn name(&self) -> &'static str {
        match self {
            Msg::Deposit { .. } => "deposit",
            Msg::Withdraw { .. } => "withdraw",
            Msg::CreateLimitOrder(_) => "create_limit_order",
            Msg::CreateMarketOrder(_) => "create_market_order",
            Msg::CancelOrder { .. } => "cancel_order",
            Msg::BatchUpdateOrders(_) => "batch_update_orders",
            Msg::LiquidatePosition { .. } => "liquidate_position",
        }
    }
}

/// Parameter and lifecycle changes decided outside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GovernanceUpdate {
    ListMarket(MarketConfig),
    /// `None` drops the override and falls back to the process-wide default
    SetAtomicFeeMultiplier {
        market_id: MarketId,
        multiplier: Option<Decimal>,
    },
    UpdateMarketFees {
        market_id: MarketId,
        maker_fee_rate: Decimal,
        taker_fee_rate: Decimal,
    },
    Pause(MarketId),
    Resume(MarketId),
    Demolish(MarketId),
    /// Settle every position at `price`, or at the mark price when absent
    ForceSettle {
        market_id: MarketId,
        price: Option<Decimal>,
    },
    SetAtomicAccess(AtomicAccess),
    SetParams(ExchangeParams),
}
