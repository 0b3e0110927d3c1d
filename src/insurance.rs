// 6.3: insurance fund collaborator. one pool per derivative market, funded by positive
// liquidation payouts and drawn on to cover shortfalls. withdrawals move whole units.
// this tracks the per-market accounting; the coins sit in the bank's insurance module.

use crate::types::MarketId;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InsuranceError {
    #[error("insurance fund for {market} holds {balance}, cannot withdraw {requested}")]
    Insufficient {
        market: MarketId,
        balance: Decimal,
        requested: Decimal,
    },

    #[error("insurance amount {0} must be positive")]
    InvalidAmount(Decimal),
}

pub trait InsuranceFund: fmt::Debug {
    fn balance(&self, market_id: MarketId) -> Decimal;

    fn withdraw(&mut self, market_id: MarketId, amount: Decimal) -> Result<(), InsuranceError>;

    fn underwrite(&mut self, market_id: MarketId, amount: Decimal) -> Result<(), InsuranceError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InMemoryInsuranceFund {
    pools: BTreeMap<MarketId, Decimal>,
    pub total_underwritten: Decimal,
    pub total_withdrawn: Decimal,
}

impl InMemoryInsuranceFund {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool(mut self, market_id: MarketId, amount: Decimal) -> Self {
        *self.pools.entry(market_id).or_default() += amount;
        self.total_underwritten += amount;
        self
    }

    /// Sum across every market pool.
    pub fn total(&self) -> Decimal {
        self.pools.values().copied().sum()
    }
}

impl InsuranceFund for InMemoryInsuranceFund {
    fn balance(&self, market_id: MarketId) -> Decimal {
        self.pools.get(&market_id).copied().unwrap_or_default()
    }

    fn withdraw(&mut self, market_id: MarketId, amount: Decimal) -> Result<(), InsuranceError> {
        if amount <= Decimal::ZERO {
            return Err(InsuranceError::InvalidAmount(amount));
        }
        let balance = self.balance(market_id);
        if balance < amount {
            return Err(InsuranceError::Insufficient {
                market: market_id,
                balance,
                requested: amount,
            });
        }
        self.pools.insert(market_id, balance - amount);
        self.total_withdrawn += amount;
        Ok(())
    }

    fn underwrite(&mut self, market_id: MarketId, amount: Decimal) -> Result<(), InsuranceError> {
        if amount <= Decimal::ZERO {
            return Err(InsuranceError::InvalidAmount(amount));
        }
        *self.pools.entry(market_id).or_default() += amount;
        self.total_underwritten += amount;
        Ok(())
    }
}
