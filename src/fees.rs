//! Fee and hold arithmetic.
//!
//! All amounts the engine moves between balances pass through the rounding
//! helpers here so that every node truncates identically. Remainders are never
//! dropped: callers route them to the protocol fee pool.

use rust_decimal::prelude::RoundingStrategy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Decimal places kept on ledger amounts.
pub const AMOUNT_PRECISION: u32 = 18;

pub fn truncate(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(AMOUNT_PRECISION, RoundingStrategy::ToZero)
}

/// Round up to the next whole unit. Insurance withdrawals move whole coins.
pub fn ceil_whole(amount: Decimal) -> Decimal {
    amount.ceil()
}

/// Amount split off `total` in proportion `part / whole`. Taking the full
/// remainder when `part == whole` keeps repeated partial takes exact.
pub fn pro_rata(total: Decimal, part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() || part >= whole {
        total
    } else {
        truncate(total * part / whole)
    }
}

/// Fee parameters of one market.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeRates {
    pub maker: Decimal,
    pub taker: Decimal,
    pub relayer_share: Decimal,
}

impl FeeRates {
    pub fn new(maker: Decimal, taker: Decimal, relayer_share: Decimal) -> Self {
        Self {
            maker,
            taker,
            relayer_share,
        }
    }

    /// A negative maker fee must be fundable out of the protocol's cut of the taker fee.
    pub fn is_fundable(&self) -> bool {
        self.taker >= Decimal::ZERO
            && self.maker + self.taker * (Decimal::ONE - self.relayer_share) >= Decimal::ZERO
    }

    /// Rate used to size the fee portion of a taker hold.
    pub fn taker_hold_rate(&self, multiplier: Decimal) -> Decimal {
        self.taker.max(Decimal::ZERO) * multiplier
    }

    /// Rates for a batch cross, where both sides pay the taker fee.
    pub fn as_takers(&self) -> Self {
        Self {
            maker: self.taker.max(Decimal::ZERO),
            ..*self
        }
    }

    /// Post-only orders can only ever pay the maker fee.
    pub fn maker_hold_rate(&self) -> Decimal {
        self.maker.max(Decimal::ZERO)
    }
}

/// `margin + price * quantity * fee_rate`, where `fee_rate` already carries the
/// atomic multiplier when the order executes atomically.
pub fn margin_hold(price: Decimal, quantity: Decimal, margin: Decimal, fee_rate: Decimal) -> Decimal {
    margin + price * quantity * fee_rate
}

/// Quote locked by a spot buy: notional plus worst-case fee.
pub fn spot_buy_hold(price: Decimal, quantity: Decimal, fee_rate: Decimal) -> Decimal {
    price * quantity * (Decimal::ONE + fee_rate)
}

/// Fees produced by a single fill. `maker_fee` is signed: negative means the
/// maker receives a rebate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TradeFees {
    pub taker_fee: Decimal,
    pub maker_fee: Decimal,
    pub taker_relayer_reward: Decimal,
    pub maker_relayer_reward: Decimal,
    pub protocol_fee: Decimal,
}

impl TradeFees {
    /// Total charged minus total paid out. Always equals `protocol_fee`.
    pub fn net_collected(&self) -> Decimal {
        self.taker_fee + self.maker_fee - self.taker_relayer_reward - self.maker_relayer_reward
    }
}

/// Split the fees of one fill.
///
/// When `charge_taker` is false (liquidation closes) the taker pays nothing and
/// a negative maker rate is treated as zero since there is no taker fee to fund it.
pub fn compute_trade_fees(
    notional: Decimal,
    rates: &FeeRates,
    taker_multiplier: Decimal,
    charge_taker: bool,
) -> TradeFees {
    let taker_fee = if charge_taker {
        truncate(notional * rates.taker.max(Decimal::ZERO) * taker_multiplier)
    } else {
        Decimal::ZERO
    };

    let (maker_fee, maker_relayer_reward) = if rates.maker >= Decimal::ZERO {
        let fee = truncate(notional * rates.maker);
        (fee, truncate(fee * rates.relayer_share))
    } else if charge_taker {
        // maker keeps (1 - relayer share) of the rebate, the relayer the rest
        let rebate = truncate(notional * -rates.maker);
        let to_maker = truncate(rebate * (Decimal::ONE - rates.relayer_share));
        (-to_maker, rebate - to_maker)
    } else {
        (Decimal::ZERO, Decimal::ZERO)
    };

    let taker_relayer_reward = truncate(taker_fee * rates.relayer_share);
    let protocol_fee = taker_fee + maker_fee - taker_relayer_reward - maker_relayer_reward;

    TradeFees {
        taker_fee,
        maker_fee,
        taker_relayer_reward,
        maker_relayer_reward,
        protocol_fee,
    }
}
