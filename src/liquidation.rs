// 6.0: liquidation math. detection, payout split, and the shortfall waterfall.
// the engine side (book sweep, cancellations, pause on insolvency) lives in engine/liquidations.rs.

use crate::fees::{ceil_whole, truncate};
use crate::position::Position;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Snapshot of a position's health at the mark price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidationCheck {
    pub equity: Decimal,
    pub maintenance_requirement: Decimal,
    pub bankruptcy_price: Decimal,
    pub liquidatable: bool,
}

pub fn evaluate_position(
    position: &Position,
    mark: Decimal,
    maintenance_margin_ratio: Decimal,
    cumulative_funding: Decimal,
) -> LiquidationCheck {
    let equity = position.equity_at(mark, cumulative_funding);
    let maintenance_requirement = maintenance_margin_ratio * position.notional_at(mark);
    // bankruptcy is measured after pending funding hits the margin
    let mut settled = position.clone();
    settled.apply_funding(cumulative_funding);
    LiquidationCheck {
        equity,
        maintenance_requirement,
        bankruptcy_price: settled.bankruptcy_price(),
        liquidatable: equity < maintenance_requirement,
    }
}

// 6.1: positive payout goes to the liquidator and the insurance fund
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PayoutSplit {
    pub liquidator_reward: Decimal,
    /// Whole units only: the insurance module holds coins.
    pub insurance_contribution: Decimal,
    // fraction left after flooring the contribution, routed to the fee pool
    pub dust: Decimal,
}

pub fn split_payout(payout: Decimal, liquidator_reward_share: Decimal) -> PayoutSplit {
    if payout <= Decimal::ZERO {
        return PayoutSplit::default();
    }
    let liquidator_reward = truncate(payout * liquidator_reward_share);
    let rest = payout - liquidator_reward;
    let insurance_contribution = rest.floor();
    PayoutSplit {
        liquidator_reward,
        insurance_contribution,
        dust: rest - insurance_contribution,
    }
}

// 6.2: negative payout. owner funds first, insurance second, whole units only
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ShortfallCoverage {
    pub from_owner: Decimal,
    pub insurance_draw: Decimal,
    // ceil rounding surplus of the insurance draw, routed to the fee pool
    pub insurance_surplus: Decimal,
    // nonzero means the market can't cover the loss and has to be wound down
    pub uncovered: Decimal,
}

impl ShortfallCoverage {
    pub fn is_covered(&self) -> bool {
        self.uncovered.is_zero()
    }
}

pub fn cover_shortfall(missing: Decimal, owner_available: Decimal, insurance_balance: Decimal) -> ShortfallCoverage {
    if missing <= Decimal::ZERO {
        return ShortfallCoverage::default();
    }
    let from_owner = missing.min(owner_available.max(Decimal::ZERO));
    let remaining = missing - from_owner;
    if remaining.is_zero() {
        return ShortfallCoverage {
            from_owner,
            ..ShortfallCoverage::default()
        };
    }

    let draw = ceil_whole(remaining);
    if insurance_balance >= draw {
        ShortfallCoverage {
            from_owner,
            insurance_draw: draw,
            insurance_surplus: draw - remaining,
            uncovered: Decimal::ZERO,
        }
    } else {
        ShortfallCoverage {
            from_owner,
            insurance_draw: Decimal::ZERO,
            insurance_surplus: Decimal::ZERO,
            uncovered: remaining,
        }
    }
}
