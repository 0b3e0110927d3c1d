//! Exportable snapshot of the whole exchange.
//!
//! A genesis state carries everything needed to rebuild an engine between
//! blocks: markets with their books and conditional orders, deposits,
//! positions, fee overrides, the protocol fee pool and the counters that keep
//! order hashes unique. Per-side order counters are not stored; they are
//! rebuilt from the orders on import.

use crate::conditional::ConditionalOrder;
use crate::config::{ConfigError, ExchangeParams};
use crate::funding::FundingState;
use crate::market::{MarketConfig, MarketError, MarketStatus};
use crate::order::Order;
use crate::position::Position;
use crate::types::{BlockContext, Denom, MarketId, OrderHash, Price, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("failed to parse genesis: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid params: {0}")]
    Params(#[from] ConfigError),

    #[error("invalid market {market}: {source}")]
    Market { market: MarketId, source: MarketError },

    #[error("market {0} listed twice")]
    DuplicateMarket(MarketId),

    #[error("order {order} does not belong to market {market}")]
    ForeignOrder { market: MarketId, order: OrderHash },

    #[error("order {0} appears twice")]
    DuplicateOrder(OrderHash),

    #[error("order {0} has a sequence at or beyond the next sequence")]
    SequenceAhead(OrderHash),

    #[error("position of {subaccount} references {market}, which is not a derivative market")]
    OrphanPosition { market: MarketId, subaccount: SubaccountId },

    #[error("deposit of {subaccount} in {denom}: available exceeds total")]
    InvalidDeposit { subaccount: SubaccountId, denom: Denom },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisMarket {
    pub config: MarketConfig,
    pub status: MarketStatus,
    pub funding: Option<FundingState>,
    pub mark_price: Option<Price>,
    pub last_trade_price: Option<Price>,
    pub settlement_price: Option<Decimal>,
    pub resting_orders: Vec<Order>,
    #[serde(default)]
    pub staged_orders: Vec<Order>,
    pub conditional_orders: Vec<ConditionalOrder>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisDeposit {
    pub subaccount_id: SubaccountId,
    pub denom: Denom,
    pub available: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisPosition {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisState {
    pub params: ExchangeParams,
    pub block: BlockContext,
    pub markets: Vec<GenesisMarket>,
    pub deposits: Vec<GenesisDeposit>,
    pub positions: Vec<GenesisPosition>,
    pub fee_multipliers: Vec<(MarketId, Decimal)>,
    pub protocol_fees: Vec<(Denom, Decimal)>,
    pub subaccount_nonces: Vec<(SubaccountId, u64)>,
    pub next_sequence: u64,
}

impl GenesisState {
    pub fn from_json(json: &str) -> Result<Self, GenesisError> {
        let genesis: GenesisState = serde_json::from_str(json)?;
        genesis.validate()?;
        Ok(genesis)
    }

    pub fn to_json(&self) -> Result<String, GenesisError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Structural checks. Balance-level consistency is checked by the engine on import.
    pub fn validate(&self) -> Result<(), GenesisError> {
        self.params.validate()?;

        let mut market_ids = BTreeSet::new();
        let mut order_hashes = BTreeSet::new();
        for market in &self.markets {
            let market_id = market.config.id;
            if !market_ids.insert(market_id) {
                return Err(GenesisError::DuplicateMarket(market_id));
            }
            market
                .config
                .validate(self.params.relayer_fee_share_rate)
                .map_err(|source| GenesisError::Market { market: market_id, source })?;

            let orders = market
                .resting_orders
                .iter()
                .chain(market.staged_orders.iter())
                .chain(market.conditional_orders.iter().map(|c| &c.order));
            for order in orders {
                if order.market_id != market_id {
                    return Err(GenesisError::ForeignOrder {
                        market: market_id,
                        order: order.hash,
                    });
                }
                if !order_hashes.insert(order.hash) {
                    return Err(GenesisError::DuplicateOrder(order.hash));
                }
                if order.sequence >= self.next_sequence {
                    return Err(GenesisError::SequenceAhead(order.hash));
                }
            }
        }

        for entry in &self.positions {
            let derivative = self
                .markets
                .iter()
                .any(|m| m.config.id == entry.market_id && m.config.is_derivative());
            if !derivative {
                return Err(GenesisError::OrphanPosition {
                    market: entry.market_id,
                    subaccount: entry.subaccount_id,
                });
            }
        }

        for deposit in &self.deposits {
            if deposit.available > deposit.total {
                return Err(GenesisError::InvalidDeposit {
                    subaccount: deposit.subaccount_id,
                    denom: deposit.denom.clone(),
                });
            }
        }
        Ok(())
    }
}
