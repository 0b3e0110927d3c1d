// 7.0 config.rs: process-wide exchange parameters in one place.
// 7.1 governance owns these values. the engine reads the latest committed copy.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Who may submit atomic market orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomicAccess {
    Nobody,
    SmartContractsOnly,
    Everyone,
}

/** 7.2: exchange parameters. defaults match mainnet genesis */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeParams {
    // Taker fee multiplier applied to atomic orders when the market has no override
    pub default_atomic_fee_multiplier: Decimal,
    // Share of every trading fee paid to the order's fee recipient
    pub relayer_fee_share_rate: Decimal,
    // Share of a positive liquidation payout paid to the liquidator. rest goes to insurance
    pub liquidator_reward_share_rate: Decimal,
    // Per (market, subaccount, side) cap on resting + conditional orders
    pub max_orders_per_side: u32,
    // Seconds between funding settlements on perpetual markets
    pub funding_interval_secs: i64,
    // Absolute cap on the hourly funding rate
    pub hourly_funding_rate_cap: Decimal,
    // Hourly interest component added to the premium
    pub hourly_interest_rate: Decimal,
    pub atomic_access: AtomicAccess,
}

impl Default for ExchangeParams {
    fn default() -> Self {
        Self {
            default_atomic_fee_multiplier: dec!(2.5),
            relayer_fee_share_rate: dec!(0.4),
            liquidator_reward_share_rate: dec!(0.05),
            max_orders_per_side: 20,
            funding_interval_secs: 3600,
            hourly_funding_rate_cap: dec!(0.000625),
            hourly_interest_rate: dec!(0.00000416666),
            atomic_access: AtomicAccess::Everyone,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("{0} must be positive")]
    NotPositive(&'static str),
}

impl ExchangeParams {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let params: Self = serde_json::from_str(json).map_err(|e| ConfigError::Json(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Json(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_atomic_fee_multiplier < Decimal::ONE {
            return Err(ConfigError::OutOfRange {
                field: "default_atomic_fee_multiplier",
                value: self.default_atomic_fee_multiplier,
                min: Decimal::ONE,
                max: Decimal::MAX,
            });
        }
        check_rate("relayer_fee_share_rate", self.relayer_fee_share_rate)?;
        check_rate("liquidator_reward_share_rate", self.liquidator_reward_share_rate)?;
        check_rate("hourly_funding_rate_cap", self.hourly_funding_rate_cap)?;
        if self.max_orders_per_side == 0 {
            return Err(ConfigError::NotPositive("max_orders_per_side"));
        }
        if self.funding_interval_secs <= 0 {
            return Err(ConfigError::NotPositive("funding_interval_secs"));
        }
        Ok(())
    }

    // Conservative preset used by local simulations
    pub fn devnet() -> Self {
        Self {
            funding_interval_secs: 60,
            ..Self::default()
        }
    }
}

fn check_rate(field: &'static str, value: Decimal) -> Result<(), ConfigError> {
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min: Decimal::ZERO,
            max: Decimal::ONE,
        });
    }
    Ok(())
}
