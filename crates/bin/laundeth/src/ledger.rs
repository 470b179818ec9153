//! local value ledger on sled
//!
//! stands in for the chain when running the pool from the cli. one tree
//! holds every account balance plus the pool's own holding; debit and
//! credit each move value inside a single sled transaction.

use std::path::Path;

use async_trait::async_trait;
use laundeth_pool::{Address, Amount, Ledger, LedgerError};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use tracing::debug;

const POOL_KEY: &[u8] = b"pool";

type TxResult<T> = std::result::Result<T, ConflictableTransactionError<LedgerError>>;

pub struct SledLedger {
    balances: sled::Tree,
}

impl SledLedger {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, sled::Error> {
        let db = sled::open(path)?;
        Ok(Self {
            balances: db.open_tree("balances")?,
        })
    }

    /// credit an account from nowhere; local runs only
    pub fn mint(&self, account: &Address, amount: Amount) -> Result<Amount, LedgerError> {
        let balance = self
            .balances
            .transaction(|tx| {
                let balance = read_amount(tx, &account.0)?
                    .checked_add(amount)
                    .ok_or(ConflictableTransactionError::Abort(LedgerError::Overflow(*account)))?;
                write_amount(tx, &account.0, balance)?;
                Ok(balance)
            })
            .map_err(from_tx)?;
        self.balances.flush().map_err(from_sled)?;
        Ok(balance)
    }

    pub fn balance(&self, account: &Address) -> Result<Amount, LedgerError> {
        self.get(&account.0)
    }

    pub fn pool_balance(&self) -> Result<Amount, LedgerError> {
        self.get(POOL_KEY)
    }

    fn get(&self, key: &[u8]) -> Result<Amount, LedgerError> {
        match self.balances.get(key).map_err(from_sled)? {
            Some(bytes) => decode(&bytes),
            None => Ok(Amount::ZERO),
        }
    }

    /// move `amount` from `from` to `to` atomically
    fn transfer(&self, from: &[u8], to: &[u8], amount: Amount, payee: Address) -> Result<(), LedgerError> {
        self.balances
            .transaction(|tx| {
                let available = read_amount(tx, from)?;
                let remaining = available.checked_sub(amount).ok_or_else(|| {
                    ConflictableTransactionError::Abort(match account_of(from) {
                        Some(account) => LedgerError::InsufficientFunds {
                            account,
                            available,
                            required: amount,
                        },
                        None => LedgerError::Rejected(format!("pool holds {}, cannot pay {}", available, amount)),
                    })
                })?;
                let credited = read_amount(tx, to)?
                    .checked_add(amount)
                    .ok_or(ConflictableTransactionError::Abort(LedgerError::Overflow(payee)))?;
                write_amount(tx, from, remaining)?;
                write_amount(tx, to, credited)?;
                Ok(())
            })
            .map_err(from_tx)?;
        // no await after the commit, so a dropped caller cannot split it
        self.balances.flush().map_err(from_sled)?;
        Ok(())
    }
}

#[async_trait]
impl Ledger for SledLedger {
    async fn debit(&self, depositor: &Address, amount: Amount) -> Result<(), LedgerError> {
        self.transfer(&depositor.0, POOL_KEY, amount, *depositor)?;
        debug!(%depositor, %amount, "ledger debit");
        Ok(())
    }

    async fn credit(&self, recipient: &Address, amount: Amount) -> Result<(), LedgerError> {
        self.transfer(POOL_KEY, &recipient.0, amount, *recipient)?;
        debug!(%recipient, %amount, "ledger credit");
        Ok(())
    }
}

fn account_of(key: &[u8]) -> Option<Address> {
    key.try_into().ok().map(Address)
}

fn read_amount(tx: &TransactionalTree, key: &[u8]) -> TxResult<Amount> {
    match tx.get(key)? {
        Some(bytes) => decode(&bytes).map_err(ConflictableTransactionError::Abort),
        None => Ok(Amount::ZERO),
    }
}

fn write_amount(tx: &TransactionalTree, key: &[u8], amount: Amount) -> TxResult<()> {
    tx.insert(key, &amount.0.to_be_bytes()[..])?;
    Ok(())
}

fn decode(bytes: &[u8]) -> Result<Amount, LedgerError> {
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| LedgerError::Rejected(format!("corrupt balance of {} bytes", bytes.len())))?;
    Ok(Amount(u128::from_be_bytes(raw)))
}

fn from_tx(err: TransactionError<LedgerError>) -> LedgerError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => from_sled(e),
    }
}

fn from_sled(err: sled::Error) -> LedgerError {
    LedgerError::Rejected(format!("sled: {}", err))
}
