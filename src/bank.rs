//! Bank collaborator.
//!
//! Wallet balances live outside the exchange. Deposits move coins from a
//! wallet into the exchange module and withdrawals move them back. Insurance
//! pools are backed by a second module account: contributions leave the
//! exchange module for it and draws come back. The bank only moves whole
//! units; fractional dust stays in the subaccount deposit or the fee pool.

use crate::types::{Denom, SubaccountId};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BankError {
    #[error("{account} holds {balance} {denom}, cannot send {requested}")]
    InsufficientBalance {
        account: SubaccountId,
        denom: Denom,
        balance: Decimal,
        requested: Decimal,
    },

    #[error("module holds {balance} {denom}, cannot send {requested}")]
    InsufficientModuleBalance {
        denom: Denom,
        balance: Decimal,
        requested: Decimal,
    },

    #[error("insurance module holds {balance} {denom}, cannot send {requested}")]
    InsufficientInsuranceBalance {
        denom: Denom,
        balance: Decimal,
        requested: Decimal,
    },

    #[error("bank amount {0} must be a positive whole number")]
    InvalidAmount(Decimal),
}

pub trait Bank: fmt::Debug {
    fn balance(&self, account: SubaccountId, denom: &Denom) -> Decimal;

    fn module_balance(&self, denom: &Denom) -> Decimal;

    fn send_to_module(&mut self, from: SubaccountId, denom: &Denom, amount: Decimal) -> Result<(), BankError>;

    fn send_from_module(&mut self, to: SubaccountId, denom: &Denom, amount: Decimal) -> Result<(), BankError>;

    fn insurance_balance(&self, denom: &Denom) -> Decimal;

    /// Exchange module to insurance module.
    fn send_to_insurance(&mut self, denom: &Denom, amount: Decimal) -> Result<(), BankError>;

    /// Insurance module back to the exchange module.
    fn send_from_insurance(&mut self, denom: &Denom, amount: Decimal) -> Result<(), BankError>;
}

fn check_amount(amount: Decimal) -> Result<(), BankError> {
    if amount <= Decimal::ZERO || !amount.fract().is_zero() {
        return Err(BankError::InvalidAmount(amount));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InMemoryBank {
    balances: BTreeMap<(SubaccountId, Denom), Decimal>,
    module: BTreeMap<Denom, Decimal>,
    insurance: BTreeMap<Denom, Decimal>,
}

impl InMemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(mut self, account: SubaccountId, denom: &str, amount: Decimal) -> Self {
        *self.balances.entry((account, Denom::from(denom))).or_default() += amount;
        self
    }

    /// Coins already sitting in the insurance module, backing pools opened at genesis.
    pub fn with_insurance_balance(mut self, denom: &str, amount: Decimal) -> Self {
        *self.insurance.entry(Denom::from(denom)).or_default() += amount;
        self
    }

    /// Wallet balances plus both module accounts for `denom`.
    pub fn supply(&self, denom: &Denom) -> Decimal {
        let wallets: Decimal = self
            .balances
            .iter()
            .filter(|((_, d), _)| d == denom)
            .map(|(_, amount)| *amount)
            .sum();
        wallets + self.module_balance(denom) + self.insurance_balance(denom)
    }
}

impl Bank for InMemoryBank {
    fn balance(&self, account: SubaccountId, denom: &Denom) -> Decimal {
        self.balances
            .get(&(account, denom.clone()))
            .copied()
            .unwrap_or_default()
    }

    fn module_balance(&self, denom: &Denom) -> Decimal {
        self.module.get(denom).copied().unwrap_or_default()
    }

    fn send_to_module(&mut self, from: SubaccountId, denom: &Denom, amount: Decimal) -> Result<(), BankError> {
        check_amount(amount)?;
        let balance = self.balance(from, denom);
        if balance < amount {
            return Err(BankError::InsufficientBalance {
                account: from,
                denom: denom.clone(),
                balance,
                requested: amount,
            });
        }
        self.balances.insert((from, denom.clone()), balance - amount);
        *self.module.entry(denom.clone()).or_default() += amount;
        Ok(())
    }

    fn send_from_module(&mut self, to: SubaccountId, denom: &Denom, amount: Decimal) -> Result<(), BankError> {
        check_amount(amount)?;
        let module = self.module_balance(denom);
        if module < amount {
            return Err(BankError::InsufficientModuleBalance {
                denom: denom.clone(),
                balance: module,
                requested: amount,
            });
        }
        self.module.insert(denom.clone(), module - amount);
        *self.balances.entry((to, denom.clone())).or_default() += amount;
        Ok(())
    }

    fn insurance_balance(&self, denom: &Denom) -> Decimal {
        self.insurance.get(denom).copied().unwrap_or_default()
    }

    fn send_to_insurance(&mut self, denom: &Denom, amount: Decimal) -> Result<(), BankError> {
        check_amount(amount)?;
        let module = self.module_balance(denom);
        if module < amount {
            return Err(BankError::InsufficientModuleBalance {
                denom: denom.clone(),
                balance: module,
                requested: amount,
            });
        }
        self.module.insert(denom.clone(), module - amount);
        *self.insurance.entry(denom.clone()).or_default() += amount;
        Ok(())
    }

    fn send_from_insurance(&mut self, denom: &Denom, amount: Decimal) -> Result<(), BankError> {
        check_amount(amount)?;
        let held = self.insurance_balance(denom);
        if held < amount {
            return Err(BankError::InsufficientInsuranceBalance {
                denom: denom.clone(),
                balance: held,
                requested: amount,
            });
        }
        self.insurance.insert(denom.clone(), held - amount);
        *self.module.entry(denom.clone()).or_default() += amount;
        Ok(())
    }
}
