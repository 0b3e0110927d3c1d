//! Margin requirements for order admission.
//!
//! Initial margin is checked twice for derivative orders: against the order
//! price and against the mark price, so a buy far above mark has to post the
//! loss it would book immediately. Binary options are fully collateralized.

use crate::market::MarketType;
use crate::types::Side;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarginError {
    #[error("insufficient order margin: required {required}, provided {provided}")]
    InsufficientOrderMargin { required: Decimal, provided: Decimal },

    #[error("margin {0} must not be negative")]
    NegativeMargin(Decimal),
}

/// Minimum margin for a vanilla order of `quantity` at `price`.
pub fn required_initial_margin(
    market_type: MarketType,
    side: Side,
    price: Decimal,
    quantity: Decimal,
    initial_margin_ratio: Decimal,
    mark: Option<Decimal>,
) -> Decimal {
    match market_type {
        MarketType::BinaryOptions => binary_option_collateral(side, price, quantity),
        MarketType::Spot => Decimal::ZERO,
        MarketType::Perpetual | MarketType::ExpiryFuture => {
            let by_price = initial_margin_ratio * price * quantity;
            let Some(mark) = mark else {
                return by_price;
            };
            // buying above mark (or selling below) books an instant loss that must be posted too
            let by_mark = match side {
                Side::Buy => quantity * (initial_margin_ratio * mark - (mark - price)),
                Side::Sell => quantity * (initial_margin_ratio * mark - (price - mark)),
            };
            by_price.max(by_mark)
        }
    }
}

/// Full collateral of a binary option order: buyer risks the price, seller the rest of 1.
pub fn binary_option_collateral(side: Side, price: Decimal, quantity: Decimal) -> Decimal {
    match side {
        Side::Buy => price * quantity,
        Side::Sell => (Decimal::ONE - price) * quantity,
    }
}

pub fn check_order_margin(
    market_type: MarketType,
    side: Side,
    price: Decimal,
    quantity: Decimal,
    margin: Decimal,
    initial_margin_ratio: Decimal,
    mark: Option<Decimal>,
) -> Result<(), MarginError> {
    if margin < Decimal::ZERO {
        return Err(MarginError::NegativeMargin(margin));
    }
    let required = required_initial_margin(market_type, side, price, quantity, initial_margin_ratio, mark);
    if margin < required {
        return Err(MarginError::InsufficientOrderMargin {
            required,
            provided: margin,
        });
    }
    Ok(())
}
