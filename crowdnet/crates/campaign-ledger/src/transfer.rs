use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, PoisonError},
};

use crate::{
    campaign::{AccountId, Amount},
    error::TransferError,
};

/// Outbound value transfer from ledger custody to an account.
///
/// An `Err` must mean that no value moved; the ledger only records a refund or
/// withdrawal after this returns `Ok`.
pub trait Transfer: Send + Sync {
    fn transfer(&self, to: &AccountId, amount: Amount) -> Result<(), TransferError>;
}

impl<T: Transfer + ?Sized> Transfer for Arc<T> {
    fn transfer(&self, to: &AccountId, amount: Amount) -> Result<(), TransferError> {
        (**self).transfer(to, amount)
    }
}

#[derive(Debug, Default)]
struct BankState {
    balances: BTreeMap<AccountId, Amount>,
    rejecting: BTreeSet<AccountId>,
}

/// In-memory account book. Payees can be switched to reject incoming
/// transfers to exercise settlement failures.
#[derive(Debug, Default)]
pub struct Bank {
    state: Mutex<BankState>,
}

impl Bank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_balances(balances: BTreeMap<AccountId, Amount>) -> Self {
        Self {
            state: Mutex::new(BankState {
                balances,
                rejecting: BTreeSet::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BankState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn balance(&self, account: &str) -> Amount {
        self.lock().balances.get(account).copied().unwrap_or(0)
    }

    pub fn balances(&self) -> BTreeMap<AccountId, Amount> {
        self.lock().balances.clone()
    }

    pub fn credit(&self, account: &AccountId, amount: Amount) -> Result<(), TransferError> {
        let mut state = self.lock();
        let balance = state.balances.entry(account.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| TransferError::BalanceOverflow {
                account: account.clone(),
            })?;
        Ok(())
    }

    /// Takes `amount` out of `account`, used for the inbound leg of a donation.
    pub fn debit(&self, account: &AccountId, amount: Amount) -> Result<(), TransferError> {
        let mut state = self.lock();
        let balance = state
            .balances
            .get_mut(account)
            .filter(|balance| **balance >= amount)
            .ok_or_else(|| TransferError::InsufficientFunds {
                account: account.clone(),
            })?;
        *balance -= amount;
        Ok(())
    }

    pub fn reject_payee(&self, account: impl Into<AccountId>) {
        self.lock().rejecting.insert(account.into());
    }

    pub fn accept_payee(&self, account: &str) {
        self.lock().rejecting.remove(account);
    }
}

impl Transfer for Bank {
    fn transfer(&self, to: &AccountId, amount: Amount) -> Result<(), TransferError> {
        if self.lock().rejecting.contains(to) {
            return Err(TransferError::Rejected {
                account: to.clone(),
            });
        }
        self.credit(to, amount)
    }
}
