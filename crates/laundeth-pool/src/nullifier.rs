//! spent-nullifier set
//!
//! a nullifier moves `Unseen -> Spent` exactly once. the move is a single
//! compare-and-swap on the durable `nullifiers` tree, so concurrent
//! withdrawals presenting the same nullifier cannot both win.
//!
//! payment outcome is tracked beside the record, never inside it: the
//! record is immutable once created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PoolError, Result};
use crate::types::{Address, Amount, Nullifier};

/// authorization of one withdrawal
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    pub nullifier: Nullifier,
    pub recipient: Address,
    pub amount: Amount,
    /// registry sequence of the root the proof was checked against
    pub root_seq: u64,
    pub accepted_at: DateTime<Utc>,
}

/// ledger settlement of an accepted withdrawal
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// record created, credit in flight
    Pending,
    Paid,
    /// credit failed or timed out; needs manual reconciliation
    Unresolved { reason: String },
    /// settled by an operator out of band
    Reconciled,
}

/// durable set of spent nullifiers
#[derive(Clone)]
pub struct NullifierSet {
    spent: sled::Tree,
    payments: sled::Tree,
}

impl NullifierSet {
    pub(crate) fn new(spent: sled::Tree, payments: sled::Tree) -> Self {
        Self { spent, payments }
    }

    /// check if nullifier exists (note already spent)
    pub fn contains(&self, nullifier: &Nullifier) -> Result<bool> {
        Ok(self.spent.contains_key(nullifier.as_ref())?)
    }

    pub fn get(&self, nullifier: &Nullifier) -> Result<Option<WithdrawalRecord>> {
        match self.spent.get(nullifier.as_ref())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// atomically insert the record if its nullifier is unseen
    ///
    /// fails with `AlreadySpent` if any record exists for the nullifier
    pub fn try_spend(&self, record: &WithdrawalRecord) -> Result<()> {
        let value = bincode::serialize(record)?;
        let swapped = self
            .spent
            .compare_and_swap(record.nullifier.as_ref(), None as Option<&[u8]>, Some(value))?;

        match swapped {
            Ok(()) => {
                self.spent.flush()?;
                debug!(nullifier = %record.nullifier, "nullifier spent");
                Ok(())
            }
            Err(_) => {
                warn!(nullifier = %record.nullifier, "double-spend attempt");
                Err(PoolError::AlreadySpent(record.nullifier))
            }
        }
    }

    pub fn set_payment(&self, nullifier: &Nullifier, status: &PaymentStatus) -> Result<()> {
        let value = bincode::serialize(status)?;
        self.payments.insert(nullifier.as_ref(), value)?;
        self.payments.flush()?;
        Ok(())
    }

    pub fn payment(&self, nullifier: &Nullifier) -> Result<Option<PaymentStatus>> {
        match self.payments.get(nullifier.as_ref())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// move an unresolved payment to reconciled
    ///
    /// only valid from `Unresolved`; never re-credits
    pub fn mark_reconciled(&self, nullifier: &Nullifier) -> Result<WithdrawalRecord> {
        let record = self
            .get(nullifier)?
            .ok_or_else(|| PoolError::Storage(format!("no withdrawal record for {}", nullifier)))?;

        let current = self.payments.get(nullifier.as_ref())?;
        let status: Option<PaymentStatus> = match &current {
            Some(bytes) => Some(bincode::deserialize(bytes)?),
            None => None,
        };
        if !matches!(status, Some(PaymentStatus::Unresolved { .. })) {
            return Err(PoolError::Storage(format!(
                "payment for {} is {:?}, not unresolved",
                nullifier, status
            )));
        }

        let next = bincode::serialize(&PaymentStatus::Reconciled)?;
        self.payments
            .compare_and_swap(nullifier.as_ref(), current, Some(next))?
            .map_err(|_| PoolError::Storage(format!("payment for {} changed concurrently", nullifier)))?;
        self.payments.flush()?;
        Ok(record)
    }

    /// records whose payment is unresolved
    pub fn unresolved(&self) -> Result<Vec<(WithdrawalRecord, String)>> {
        let mut out = Vec::new();
        for item in self.payments.iter() {
            let (key, value) = item?;
            if let PaymentStatus::Unresolved { reason } = bincode::deserialize::<PaymentStatus>(&value)? {
                let nullifier = key_to_nullifier(&key)?;
                if let Some(record) = self.get(&nullifier)? {
                    out.push((record, reason));
                }
            }
        }
        Ok(out)
    }

    /// mark payments left `Pending` (or never recorded) by a previous run
    /// as unresolved; a credit may or may not have happened
    ///
    /// only call this before any withdrawal is in flight
    pub fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;
        for item in self.spent.iter() {
            let (key, _) = item?;
            let nullifier = key_to_nullifier(&key)?;
            match self.payment(&nullifier)? {
                Some(PaymentStatus::Pending) | None => {
                    warn!(%nullifier, "payment interrupted, needs reconciliation");
                    self.set_payment(
                        &nullifier,
                        &PaymentStatus::Unresolved {
                            reason: "interrupted before payment settled".into(),
                        },
                    )?;
                    recovered += 1;
                }
                Some(_) => {}
            }
        }
        Ok(recovered)
    }

    /// number of spent nullifiers
    pub fn len(&self) -> usize {
        self.spent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spent.is_empty()
    }
}

fn key_to_nullifier(key: &[u8]) -> Result<Nullifier> {
    let bytes: [u8; 32] = key
        .try_into()
        .map_err(|_| PoolError::Storage(format!("bad nullifier key length {}", key.len())))?;
    Ok(Nullifier(bytes))
}
