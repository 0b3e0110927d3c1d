// 8.0.2: result types and errors for engine operations.

use crate::bank::BankError;
use crate::conditional::TriggerError;
use crate::config::ConfigError;
use crate::events::Placement;
use crate::insurance::InsuranceError;
use crate::ledger::LedgerError;
use crate::margin::MarginError;
use crate::market::{MarketError, MarketStatus, MarketType};
use crate::matching::Fill;
use crate::order::OrderType;
use crate::settlement::SettlementPlan;
use crate::types::{Denom, MarketId, OrderHash, Price, Side, SubaccountId};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderResult {
    pub order_hash: OrderHash,
    pub placement: Placement,
    /// Quantity accepted after reduce-only resizing
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub average_price: Option<Price>,
    pub fills: Vec<Fill>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchUpdateResult {
    pub canceled: Vec<OrderHash>,
    /// One entry per failed cancel, in request order
    pub cancel_failures: Vec<(OrderHash, EngineError)>,
    /// One entry per create, limit orders first, then market orders
    pub created: Vec<Result<OrderResult, EngineError>>,
}

impl BatchUpdateResult {
    pub fn created_hashes(&self) -> Vec<OrderHash> {
        self.created
            .iter()
            .filter_map(|r| r.as_ref().ok().map(|o| o.order_hash))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidationResult {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub quantity: Decimal,
    pub bankruptcy_price: Decimal,
    pub average_price: Option<Price>,
    pub payout: Decimal,
    pub liquidator_reward: Decimal,
    pub insurance_contribution: Decimal,
    pub owner_contribution: Decimal,
    pub insurance_draw: Decimal,
    /// Set when the insurance fund could not cover the loss and the market was wound down
    pub settlement: Option<SettlementPlan>,
}

impl LiquidationResult {
    pub fn market_paused(&self) -> bool {
        self.settlement.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MsgResponse {
    Deposited { new_total: Decimal },
    Withdrawn { new_total: Decimal },
    Order(OrderResult),
    Canceled { released: Decimal },
    BatchUpdate(BatchUpdateResult),
    Liquidation(LiquidationResult),
}

impl MsgResponse {
    pub fn order(&self) -> Option<&OrderResult> {
        match self {
            MsgResponse::Order(result) => Some(result),
            _ => None,
        }
    }

    pub fn order_hash(&self) -> Option<OrderHash> {
        self.order().map(|o| o.order_hash)
    }
}

/// What end_block did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BlockReport {
    pub height: u64,
    pub triggered: usize,
    pub executed: usize,
    pub rested: usize,
    pub rejected: usize,
    pub fills: usize,
    pub funding: Vec<(MarketId, Decimal)>,
    pub expired: Vec<MarketId>,
    pub invariant_violations: Vec<String>,
}

/// Error taxonomy used for propagation and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Validation,
    Capacity,
    Liquidity,
    Funds,
    NotFound,
    Lifecycle,
    Internal,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("market {0} not found")]
    MarketNotFound(MarketId),

    #[error("market {market} is {status:?}")]
    MarketNotActive { market: MarketId, status: MarketStatus },

    #[error("{operation} is not supported on {market_type:?} markets")]
    UnsupportedMarketType {
        market_type: MarketType,
        operation: &'static str,
    },

    #[error("order {0} does not exist")]
    OrderDoesntExist(OrderHash),

    #[error("{subaccount} has no position in {market}")]
    PositionNotFound { market: MarketId, subaccount: SubaccountId },

    #[error("reduce-only {side} order requires an opposite position")]
    InvalidReduceOnlyPositionDirection { side: Side },

    #[error("no liquidity on the orderbook of {0}")]
    NoLiquidity(MarketId),

    #[error("{subaccount} exceeds the {side} order count in {market}")]
    ExceedsOrderSideCount {
        market: MarketId,
        subaccount: SubaccountId,
        side: Side,
    },

    #[error("{subaccount} already has a conditional market order in that direction")]
    ConditionalMarketOrderAlreadyExists { subaccount: SubaccountId },

    #[error("{subaccount} already placed a market order in {market} this block")]
    MarketOrderAlreadyExists { market: MarketId, subaccount: SubaccountId },

    #[error("invalid trigger price: {0}")]
    InvalidTriggerPrice(#[from] TriggerError),

    #[error("{order_type:?} order: {reason}")]
    InvalidOrderType { order_type: OrderType, reason: &'static str },

    #[error("atomic orders are not allowed in a batch update")]
    AtomicOrderInBatch,

    #[error("atomic orders are not available to this sender")]
    AtomicAccessDenied,

    #[error("post-only order would cross the book")]
    PostOnlyWouldCross,

    #[error("insufficient {denom} deposit: required {required}, available {available}")]
    InsufficientDeposit {
        denom: Denom,
        required: Decimal,
        available: Decimal,
    },

    #[error("position of {subaccount} in {market} is not liquidable")]
    PositionNotLiquidable { market: MarketId, subaccount: SubaccountId },

    #[error("no mark price for {0}")]
    NoMarkPrice(MarketId),

    #[error("amount {0} must be positive")]
    InvalidAmount(Decimal),

    #[error("margin: {0}")]
    Margin(#[from] MarginError),

    #[error("market: {0}")]
    Market(#[from] MarketError),

    #[error("ledger: {0}")]
    Ledger(LedgerError),

    #[error("insurance: {0}")]
    Insurance(#[from] InsuranceError),

    #[error("bank: {0}")]
    Bank(#[from] BankError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("genesis: {0}")]
    Genesis(String),
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                denom,
                required,
                available,
                ..
            } => EngineError::InsufficientDeposit {
                denom,
                required,
                available,
            },
            other => EngineError::Ledger(other),
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidTriggerPrice(_)
            | EngineError::InvalidOrderType { .. }
            | EngineError::InvalidReduceOnlyPositionDirection { .. }
            | EngineError::AtomicOrderInBatch
            | EngineError::AtomicAccessDenied
            | EngineError::PostOnlyWouldCross
            | EngineError::PositionNotLiquidable { .. }
            | EngineError::NoMarkPrice(_)
            | EngineError::InvalidAmount(_)
            | EngineError::UnsupportedMarketType { .. }
            | EngineError::Margin(_)
            | EngineError::Config(_) => ErrorKind::Validation,
            EngineError::Market(MarketError::InvalidStatusTransition { .. }) => ErrorKind::Lifecycle,
            EngineError::Market(_) => ErrorKind::Validation,
            EngineError::ExceedsOrderSideCount { .. }
            | EngineError::ConditionalMarketOrderAlreadyExists { .. }
            | EngineError::MarketOrderAlreadyExists { .. } => ErrorKind::Capacity,
            EngineError::NoLiquidity(_) => ErrorKind::Liquidity,
            EngineError::InsufficientDeposit { .. } | EngineError::Bank(_) => ErrorKind::Funds,
            EngineError::MarketNotFound(_) | EngineError::OrderDoesntExist(_) | EngineError::PositionNotFound { .. } => {
                ErrorKind::NotFound
            }
            EngineError::MarketNotActive { .. } => ErrorKind::Lifecycle,
            EngineError::Ledger(_) | EngineError::Insurance(_) | EngineError::Genesis(_) => ErrorKind::Internal,
        }
    }
}
