//! Subaccount deposits.
//!
//! Each (subaccount, denom) pair tracks a total balance and the part of it that
//! is available. The difference is exactly what open orders hold. Matching does
//! not write here directly: it accumulates [`DepositDeltas`] and applies them in
//! one step when an order finishes executing.

use crate::types::{Denom, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    pub available: Decimal,
    pub total: Decimal,
}

impl Deposit {
    pub fn locked(&self) -> Decimal {
        self.total - self.available
    }

    pub fn is_zero(&self) -> bool {
        self.available.is_zero() && self.total.is_zero()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("insufficient {denom} for {subaccount}: required {required}, available {available}")]
    InsufficientFunds {
        subaccount: SubaccountId,
        denom: Denom,
        required: Decimal,
        available: Decimal,
    },

    #[error("negative amount {0}")]
    NegativeAmount(Decimal),

    #[error("available {available} exceeds total {total} for {subaccount} {denom}")]
    AvailableExceedsTotal {
        subaccount: SubaccountId,
        denom: Denom,
        available: Decimal,
        total: Decimal,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub available: Decimal,
    pub total: Decimal,
}

/// Pending balance changes keyed by (subaccount, denom).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepositDeltas {
    inner: BTreeMap<(SubaccountId, Denom), BalanceDelta>,
}

impl DepositDeltas {
    pub fn add(&mut self, subaccount: SubaccountId, denom: &Denom, available: Decimal, total: Decimal) {
        if available.is_zero() && total.is_zero() {
            return;
        }
        let delta = self.inner.entry((subaccount, denom.clone())).or_default();
        delta.available += available;
        delta.total += total;
    }

    /// Same change to available and total: a real transfer of value.
    pub fn transfer(&mut self, subaccount: SubaccountId, denom: &Denom, amount: Decimal) {
        self.add(subaccount, denom, amount, amount);
    }

    /// Hold released back to available, total unchanged.
    pub fn unlock(&mut self, subaccount: SubaccountId, denom: &Denom, amount: Decimal) {
        self.add(subaccount, denom, amount, Decimal::ZERO);
    }

    pub fn get(&self, subaccount: SubaccountId, denom: &Denom) -> BalanceDelta {
        self.inner
            .get(&(subaccount, denom.clone()))
            .copied()
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(SubaccountId, Denom), &BalanceDelta)> {
        self.inner.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Net total-balance change for `denom` across all subaccounts.
    pub fn net_total(&self, denom: &Denom) -> Decimal {
        self.inner
            .iter()
            .filter(|((_, d), _)| d == denom)
            .map(|(_, delta)| delta.total)
            .sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Deposits {
    inner: BTreeMap<(SubaccountId, Denom), Deposit>,
}

impl Deposits {
    pub fn get(&self, subaccount: SubaccountId, denom: &Denom) -> Deposit {
        self.inner
            .get(&(subaccount, denom.clone()))
            .copied()
            .unwrap_or_default()
    }

    fn entry(&mut self, subaccount: SubaccountId, denom: &Denom) -> &mut Deposit {
        self.inner.entry((subaccount, denom.clone())).or_default()
    }

    pub fn set(&mut self, subaccount: SubaccountId, denom: &Denom, deposit: Deposit) {
        if deposit.is_zero() {
            self.inner.remove(&(subaccount, denom.clone()));
        } else {
            self.inner.insert((subaccount, denom.clone()), deposit);
        }
    }

    /// Add to both balances.
    pub fn credit(&mut self, subaccount: SubaccountId, denom: &Denom, amount: Decimal) -> Result<(), LedgerError> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount(amount));
        }
        let deposit = self.entry(subaccount, denom);
        deposit.available += amount;
        deposit.total += amount;
        Ok(())
    }

    /// Remove from both balances. Only available funds may leave.
    pub fn debit(&mut self, subaccount: SubaccountId, denom: &Denom, amount: Decimal) -> Result<(), LedgerError> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount(amount));
        }
        let deposit = self.get(subaccount, denom);
        if deposit.available < amount {
            return Err(LedgerError::InsufficientFunds {
                subaccount,
                denom: denom.clone(),
                required: amount,
                available: deposit.available,
            });
        }
        let entry = self.entry(subaccount, denom);
        entry.available -= amount;
        entry.total -= amount;
        Ok(())
    }

    /// Move `amount` from available into the held portion.
    pub fn lock(&mut self, subaccount: SubaccountId, denom: &Denom, amount: Decimal) -> Result<(), LedgerError> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount(amount));
        }
        let deposit = self.get(subaccount, denom);
        if deposit.available < amount {
            return Err(LedgerError::InsufficientFunds {
                subaccount,
                denom: denom.clone(),
                required: amount,
                available: deposit.available,
            });
        }
        self.entry(subaccount, denom).available -= amount;
        Ok(())
    }

    pub fn unlock(&mut self, subaccount: SubaccountId, denom: &Denom, amount: Decimal) {
        if amount.is_zero() {
            return;
        }
        self.entry(subaccount, denom).available += amount;
    }

    /// Apply accumulated deltas. Balances may go negative (a losing position can
    /// owe more than it held) but available can never exceed total.
    pub fn apply(&mut self, deltas: &DepositDeltas) -> Result<(), LedgerError> {
        let mut updated = Vec::new();
        for ((subaccount, denom), delta) in deltas.iter() {
            let mut deposit = self.get(*subaccount, denom);
            deposit.available += delta.available;
            deposit.total += delta.total;
            if deposit.available > deposit.total {
                return Err(LedgerError::AvailableExceedsTotal {
                    subaccount: *subaccount,
                    denom: denom.clone(),
                    available: deposit.available,
                    total: deposit.total,
                });
            }
            updated.push((*subaccount, denom, deposit));
        }
        for (subaccount, denom, deposit) in updated {
            self.set(subaccount, denom, deposit);
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(SubaccountId, Denom), &Deposit)> {
        self.inner.iter()
    }

    pub fn total_of(&self, denom: &Denom) -> Decimal {
        self.inner
            .iter()
            .filter(|((_, d), _)| d == denom)
            .map(|(_, deposit)| deposit.total)
            .sum()
    }
}
