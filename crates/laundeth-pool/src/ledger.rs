//! ledger capability
//!
//! the pool moves funds only through this trait: one `debit` per admitted
//! commitment, one `credit` per accepted nullifier.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::types::{Address, Amount};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient funds: {account} has {available}, needs {required}")]
    InsufficientFunds {
        account: Address,
        available: Amount,
        required: Amount,
    },

    #[error("balance overflow for {0}")]
    Overflow(Address),

    #[error("transfer rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// take `amount` from the depositor into the pool
    async fn debit(&self, depositor: &Address, amount: Amount) -> Result<(), LedgerError>;

    /// pay `amount` out of the pool to the recipient
    async fn credit(&self, recipient: &Address, amount: Amount) -> Result<(), LedgerError>;
}

#[async_trait]
impl<L: Ledger + ?Sized> Ledger for Arc<L> {
    async fn debit(&self, depositor: &Address, amount: Amount) -> Result<(), LedgerError> {
        (**self).debit(depositor, amount).await
    }

    async fn credit(&self, recipient: &Address, amount: Amount) -> Result<(), LedgerError> {
        (**self).credit(recipient, amount).await
    }
}

/// in-process ledger with plain balances
#[derive(Default)]
pub struct MemoryLedger {
    balances: Mutex<HashMap<Address, Amount>>,
    pool: Mutex<Amount>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// mint funds to an account
    pub fn fund(&self, account: Address, amount: Amount) {
        let mut balances = self.balances.lock();
        let balance = balances.entry(account).or_default();
        *balance = balance.checked_add(amount).unwrap_or(Amount(u128::MAX));
    }

    pub fn balance(&self, account: &Address) -> Amount {
        self.balances.lock().get(account).copied().unwrap_or_default()
    }

    /// funds held by the pool
    pub fn pool_balance(&self) -> Amount {
        *self.pool.lock()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn debit(&self, depositor: &Address, amount: Amount) -> Result<(), LedgerError> {
        let mut balances = self.balances.lock();
        let available = balances.get(depositor).copied().unwrap_or_default();
        let remaining = available
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientFunds {
                account: *depositor,
                available,
                required: amount,
            })?;

        let mut pool = self.pool.lock();
        *pool = pool
            .checked_add(amount)
            .ok_or(LedgerError::Rejected("pool balance overflow".into()))?;
        balances.insert(*depositor, remaining);
        Ok(())
    }

    async fn credit(&self, recipient: &Address, amount: Amount) -> Result<(), LedgerError> {
        // same lock order as debit
        let mut balances = self.balances.lock();
        let mut pool = self.pool.lock();
        let held = *pool;
        let remaining = held.checked_sub(amount).ok_or_else(|| {
            LedgerError::Rejected(format!("pool holds {}, cannot pay {}", held, amount))
        })?;

        let balance = balances.entry(*recipient).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow(*recipient))?;
        *pool = remaining;
        Ok(())
    }
}
