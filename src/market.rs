//! Market configuration, lifecycle status and runtime state.
//!
//! A market is a single trading pair with its own resting book, conditional
//! store and same-block staging area. Derivative markets also carry funding.

use crate::conditional::ConditionalOrderBook;
use crate::fees::FeeRates;
use crate::funding::FundingState;
use crate::order::Order;
use crate::orderbook::OrderBook;
use crate::types::{Denom, MarketId, Price, Side, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketType {
    Spot,
    Perpetual,
    ExpiryFuture,
    BinaryOptions,
}

impl MarketType {
    pub fn is_derivative(&self) -> bool {
        !matches!(self, MarketType::Spot)
    }

    /// Markets whose positions can go underwater and be liquidated.
    pub fn is_leveraged(&self) -> bool {
        matches!(self, MarketType::Perpetual | MarketType::ExpiryFuture)
    }
}

/// Market status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MarketStatus {
    /// Open for trading
    #[default]
    Active,
    /// Admission blocked, resting orders kept, liquidations continue
    Paused,
    /// Removed by governance. orders canceled, positions closed
    Demolished,
    /// Past expiry. positions settled
    Expired,
    /// Force-settled at an explicit or oracle price
    Settled,
}

impl MarketStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MarketStatus::Demolished | MarketStatus::Expired | MarketStatus::Settled)
    }

    pub fn can_transition_to(&self, next: MarketStatus) -> bool {
        use MarketStatus::*;
        matches!(
            (self, next),
            (Active, Paused | Demolished | Expired | Settled) | (Paused, Active | Demolished | Settled)
        )
    }

    pub fn transition(self, next: MarketStatus) -> Result<MarketStatus, MarketError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(MarketError::InvalidStatusTransition { from: self, to: next })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketError {
    #[error("price {price} is not a multiple of tick {tick}")]
    InvalidPriceTick { price: Decimal, tick: Decimal },

    #[error("quantity {quantity} is not a positive multiple of tick {tick}")]
    InvalidQuantityTick { quantity: Decimal, tick: Decimal },

    #[error("price {0} outside the binary option range (0, 1)")]
    PriceOutOfRange(Decimal),

    #[error("cannot move market from {from:?} to {to:?}")]
    InvalidStatusTransition { from: MarketStatus, to: MarketStatus },

    #[error("maker fee {maker} is not covered by taker fee {taker}")]
    UnfundableFees { maker: Decimal, taker: Decimal },

    #[error("invalid market config: {0}")]
    InvalidConfig(&'static str),

    #[error("market {0} already exists")]
    AlreadyExists(MarketId),
}

/// Market parameters. only governance changes these after listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub id: MarketId,
    /// Human-readable ticker (e.g., "INJ/USDT")
    pub ticker: String,
    pub market_type: MarketType,
    /// Base denom for spot, oracle base symbol for derivatives
    pub base_denom: Denom,
    /// Quote denom. margin and fees are paid in it
    pub quote_denom: Denom,
    pub maker_fee_rate: Decimal,
    pub taker_fee_rate: Decimal,
    pub min_price_tick: Decimal,
    pub min_quantity_tick: Decimal,
    pub initial_margin_ratio: Decimal,
    pub maintenance_margin_ratio: Decimal,
    pub expiry: Option<Timestamp>,
}

impl MarketConfig {
    pub fn spot(id: u32, base: &str, quote: &str) -> Self {
        Self {
            id: MarketId(id),
            ticker: format!("{}/{}", base.to_uppercase(), quote.to_uppercase()),
            market_type: MarketType::Spot,
            base_denom: Denom::from(base),
            quote_denom: Denom::from(quote),
            maker_fee_rate: dec!(0.001),
            taker_fee_rate: dec!(0.002),
            min_price_tick: dec!(0.001),
            min_quantity_tick: dec!(0.001),
            initial_margin_ratio: Decimal::ZERO,
            maintenance_margin_ratio: Decimal::ZERO,
            expiry: None,
        }
    }

    pub fn perpetual(id: u32, base: &str, quote: &str) -> Self {
        Self {
            id: MarketId(id),
            ticker: format!("{}/{} PERP", base.to_uppercase(), quote.to_uppercase()),
            market_type: MarketType::Perpetual,
            base_denom: Denom::from(base),
            quote_denom: Denom::from(quote),
            maker_fee_rate: dec!(-0.0001),
            taker_fee_rate: dec!(0.001),
            min_price_tick: dec!(0.01),
            min_quantity_tick: dec!(0.001),
            initial_margin_ratio: dec!(0.05),
            maintenance_margin_ratio: dec!(0.02),
            expiry: None,
        }
    }

    pub fn expiry_future(id: u32, base: &str, quote: &str, expiry: Timestamp) -> Self {
        Self {
            ticker: format!("{}/{} FUT", base.to_uppercase(), quote.to_uppercase()),
            market_type: MarketType::ExpiryFuture,
            expiry: Some(expiry),
            ..Self::perpetual(id, base, quote)
        }
    }

    pub fn binary_options(id: u32, symbol: &str, quote: &str, expiry: Timestamp) -> Self {
        Self {
            id: MarketId(id),
            ticker: format!("{} BINARY", symbol.to_uppercase()),
            market_type: MarketType::BinaryOptions,
            base_denom: Denom::from(symbol),
            quote_denom: Denom::from(quote),
            maker_fee_rate: dec!(0.001),
            taker_fee_rate: dec!(0.002),
            min_price_tick: dec!(0.0001),
            min_quantity_tick: dec!(1),
            initial_margin_ratio: Decimal::ZERO,
            maintenance_margin_ratio: Decimal::ZERO,
            expiry: Some(expiry),
        }
    }

    pub fn with_fees(mut self, maker: Decimal, taker: Decimal) -> Self {
        self.maker_fee_rate = maker;
        self.taker_fee_rate = taker;
        self
    }

    pub fn with_ticks(mut self, price_tick: Decimal, quantity_tick: Decimal) -> Self {
        self.min_price_tick = price_tick;
        self.min_quantity_tick = quantity_tick;
        self
    }

    pub fn with_margin_ratios(mut self, initial: Decimal, maintenance: Decimal) -> Self {
        self.initial_margin_ratio = initial;
        self.maintenance_margin_ratio = maintenance;
        self
    }

    pub fn fee_rates(&self, relayer_share: Decimal) -> FeeRates {
        FeeRates::new(self.maker_fee_rate, self.taker_fee_rate, relayer_share)
    }

    pub fn is_derivative(&self) -> bool {
        self.market_type.is_derivative()
    }

    /// Denom an order on `side` locks.
    pub fn hold_denom(&self, side: Side) -> &Denom {
        match (self.market_type, side) {
            (MarketType::Spot, Side::Sell) => &self.base_denom,
            _ => &self.quote_denom,
        }
    }

    pub fn validate(&self, relayer_share: Decimal) -> Result<(), MarketError> {
        if self.min_price_tick <= Decimal::ZERO || self.min_quantity_tick <= Decimal::ZERO {
            return Err(MarketError::InvalidConfig("tick sizes must be positive"));
        }
        if !self.fee_rates(relayer_share).is_fundable() {
            return Err(MarketError::UnfundableFees {
                maker: self.maker_fee_rate,
                taker: self.taker_fee_rate,
            });
        }
        if self.market_type.is_leveraged() {
            if self.maintenance_margin_ratio <= Decimal::ZERO {
                return Err(MarketError::InvalidConfig("maintenance margin ratio must be positive"));
            }
            if self.initial_margin_ratio < self.maintenance_margin_ratio {
                return Err(MarketError::InvalidConfig("initial margin ratio below maintenance"));
            }
        }
        if matches!(self.market_type, MarketType::ExpiryFuture | MarketType::BinaryOptions) && self.expiry.is_none() {
            return Err(MarketError::InvalidConfig("expiring market without expiry"));
        }
        Ok(())
    }

    /// Prices must sit exactly on the tick grid. binary options trade inside (0, 1).
    pub fn validate_price(&self, price: Price) -> Result<(), MarketError> {
        let value = price.value();
        if !(value % self.min_price_tick).is_zero() {
            return Err(MarketError::InvalidPriceTick {
                price: value,
                tick: self.min_price_tick,
            });
        }
        if self.market_type == MarketType::BinaryOptions && value >= Decimal::ONE {
            return Err(MarketError::PriceOutOfRange(value));
        }
        Ok(())
    }

    pub fn validate_quantity(&self, quantity: Decimal) -> Result<(), MarketError> {
        if quantity <= Decimal::ZERO || !(quantity % self.min_quantity_tick).is_zero() {
            return Err(MarketError::InvalidQuantityTick {
                quantity,
                tick: self.min_quantity_tick,
            });
        }
        Ok(())
    }
}

/// Dynamic market state
#[derive(Debug, Clone)]
pub struct MarketState {
    pub config: MarketConfig,
    pub status: MarketStatus,
    pub book: OrderBook,
    pub conditional: ConditionalOrderBook,
    /// Orders admitted this block, in admission order, waiting for the batch
    pub transient: Vec<Order>,
    pub funding: Option<FundingState>,
    /// Reference price snapshot taken at the start of the block
    pub mark_price: Option<Price>,
    pub last_trade_price: Option<Price>,
    pub settlement_price: Option<Decimal>,
}

impl MarketState {
    pub fn new(config: MarketConfig, funding: Option<FundingState>) -> Self {
        let book = OrderBook::new(config.id);
        let conditional = ConditionalOrderBook::new(config.id);
        Self {
            config,
            status: MarketStatus::Active,
            book,
            conditional,
            transient: Vec::new(),
            funding,
            mark_price: None,
            last_trade_price: None,
            settlement_price: None,
        }
    }

    pub fn id(&self) -> MarketId {
        self.config.id
    }

    pub fn is_active(&self) -> bool {
        self.status == MarketStatus::Active
    }

    pub fn cumulative_funding(&self) -> Decimal {
        self.funding.as_ref().map_or(Decimal::ZERO, |f| f.cumulative_funding)
    }

    /// Price used for triggers and margin: the snapshot, else the last trade.
    pub fn reference_price(&self) -> Option<Price> {
        self.mark_price.or(self.last_trade_price)
    }

    pub fn transient_position(&self, hash: &crate::types::OrderHash) -> Option<usize> {
        self.transient.iter().position(|o| &o.hash == hash)
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.config.expiry.is_some_and(|expiry| now >= expiry)
    }
}
