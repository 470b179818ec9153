//! withdrawal authorizer
//!
//! ```text
//! bundle ─▶ parse inputs ─▶ root known? ─▶ nullifier unseen? ─▶ verify
//!                                                                  │
//!            credit ledger ◀── record payment ◀── CAS insert record ◀┘
//! ```
//!
//! the nullifier pre-check only saves a verifier call; the compare-and-swap
//! insert is the real double-spend gate. verification runs with no lock
//! held. once the record is in, the nullifier is spent whatever the ledger
//! does next; dropping the future mid-credit leaves the payment unresolved.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{PoolError, Result};
use crate::ledger::Ledger;
use crate::nullifier::{NullifierSet, PaymentStatus, WithdrawalRecord};
use crate::proof::{ProofBundle, ProofVerifier, ProtocolVersion, VerificationKey};
use crate::registry::RootRegistry;
use crate::types::{Address, Amount, Nullifier};

pub struct WithdrawalAuthorizer<V, L> {
    version: ProtocolVersion,
    vk: VerificationKey,
    denomination: Amount,
    engine_timeout: Duration,
    ledger_timeout: Duration,
    registry: Arc<RwLock<RootRegistry>>,
    nullifiers: NullifierSet,
    verifier: V,
    ledger: Arc<L>,
}

impl<V: ProofVerifier, L: Ledger> WithdrawalAuthorizer<V, L> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: ProtocolVersion,
        vk: VerificationKey,
        denomination: Amount,
        engine_timeout: Duration,
        ledger_timeout: Duration,
        registry: Arc<RwLock<RootRegistry>>,
        nullifiers: NullifierSet,
        verifier: V,
        ledger: Arc<L>,
    ) -> Self {
        Self {
            version,
            vk,
            denomination,
            engine_timeout,
            ledger_timeout,
            registry,
            nullifiers,
            verifier,
            ledger,
        }
    }

    /// validate a proof bundle and pay `recipient` once per nullifier
    pub async fn withdraw(&self, recipient: Address, bundle: &ProofBundle) -> Result<WithdrawalRecord> {
        let claim = bundle.inputs.parse(self.version)?;

        let root_seq = self
            .registry
            .read()
            .entry_for(&claim.root)
            .map(|entry| entry.seq)
            .ok_or(PoolError::UnknownRoot(claim.root))?;

        if self.nullifiers.contains(&claim.nullifier)? {
            return Err(PoolError::AlreadySpent(claim.nullifier));
        }

        debug!(nullifier = %claim.nullifier, root_seq, "verifying withdrawal proof");
        let verdict = timeout(
            self.engine_timeout,
            self.verifier.verify(&bundle.inputs, &bundle.proof, &self.vk),
        )
        .await
        .map_err(|_| {
            warn!(nullifier = %claim.nullifier, "proof engine timed out");
            PoolError::EngineTimeout(self.engine_timeout)
        })?;

        match verdict {
            Ok(true) => {}
            Ok(false) => {
                warn!(nullifier = %claim.nullifier, "proof rejected");
                return Err(PoolError::InvalidProof);
            }
            Err(PoolError::EngineFailure(reason)) => return Err(PoolError::EngineFailure(reason)),
            Err(other) => return Err(PoolError::EngineFailure(other.to_string())),
        }

        let record = WithdrawalRecord {
            nullifier: claim.nullifier,
            recipient,
            amount: self.denomination,
            root_seq,
            accepted_at: Utc::now(),
        };
        self.nullifiers.try_spend(&record)?;
        self.nullifiers.set_payment(&record.nullifier, &PaymentStatus::Pending)?;
        info!(nullifier = %record.nullifier, %recipient, root_seq, "withdrawal accepted");

        self.settle(record).await
    }

    /// credit the ledger for an accepted record; never retried
    async fn settle(&self, record: WithdrawalRecord) -> Result<WithdrawalRecord> {
        let mut guard = SettleGuard::new(&self.nullifiers, record.nullifier);
        let credited = timeout(
            self.ledger_timeout,
            self.ledger.credit(&record.recipient, record.amount),
        )
        .await;
        guard.disarm();

        match credited {
            Ok(Ok(())) => {
                self.nullifiers.set_payment(&record.nullifier, &PaymentStatus::Paid)?;
                info!(nullifier = %record.nullifier, amount = %record.amount, "withdrawal paid");
                Ok(record)
            }
            Ok(Err(e)) => {
                let reason = e.to_string();
                error!(nullifier = %record.nullifier, %reason, "payment failed after acceptance, needs reconciliation");
                self.nullifiers.set_payment(
                    &record.nullifier,
                    &PaymentStatus::Unresolved {
                        reason: reason.clone(),
                    },
                )?;
                Err(PoolError::LedgerTransferFailed {
                    reason,
                    record: Some(Box::new(record)),
                })
            }
            Err(_) => {
                error!(nullifier = %record.nullifier, "ledger timed out after acceptance, needs reconciliation");
                self.nullifiers.set_payment(
                    &record.nullifier,
                    &PaymentStatus::Unresolved {
                        reason: format!("ledger timed out after {:?}", self.ledger_timeout),
                    },
                )?;
                Err(PoolError::LedgerTimeout {
                    timeout: self.ledger_timeout,
                    record: Some(Box::new(record)),
                })
            }
        }
    }

    pub fn nullifiers(&self) -> &NullifierSet {
        &self.nullifiers
    }
}

/// marks the payment unresolved if the settling future is dropped while
/// the credit is in flight
struct SettleGuard<'a> {
    nullifiers: &'a NullifierSet,
    nullifier: Nullifier,
    armed: bool,
}

impl<'a> SettleGuard<'a> {
    fn new(nullifiers: &'a NullifierSet, nullifier: Nullifier) -> Self {
        Self {
            nullifiers,
            nullifier,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        error!(nullifier = %self.nullifier, "withdrawal cancelled during payment, needs reconciliation");
        let status = PaymentStatus::Unresolved {
            reason: "cancelled while the ledger credit was in flight".into(),
        };
        if let Err(e) = self.nullifiers.set_payment(&self.nullifier, &status) {
            error!(nullifier = %self.nullifier, error = %e, "failed to record cancelled payment");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::Accumulator;
    use crate::ledger::MemoryLedger;
    use crate::note::DepositNote;
    use crate::proof::{DigestVerifier, PublicInputs};
    use crate::storage::Storage;

    const OWNER: Address = Address([1; 20]);
    const RECIPIENT: Address = Address([3; 20]);

    struct Fixture {
        authorizer: WithdrawalAuthorizer<DigestVerifier, MemoryLedger>,
        ledger: Arc<MemoryLedger>,
        bundle: ProofBundle,
        _storage: Storage,
    }

    async fn fixture() -> Fixture {
        let note = DepositNote::from_integers(11, 22);
        let acc = Accumulator::from_leaves(3, [note.commitment()]).unwrap();
        let mut registry = RootRegistry::new(OWNER);
        registry.publish(acc.root(), OWNER, &acc, Utc::now()).unwrap();

        let ledger = Arc::new(MemoryLedger::new());
        ledger.fund(Address([2; 20]), Amount::ETHER);
        ledger.debit(&Address([2; 20]), Amount::ETHER).await.unwrap();

        let storage = Storage::temporary().unwrap();
        let vk = VerificationKey(b"test-vk".to_vec());
        let inputs = PublicInputs::for_statement(ProtocolVersion::V1, &acc.root(), &note.nullifier_hash());
        let bundle = ProofBundle::new(DigestVerifier::prove(&inputs, &vk), inputs);

        let authorizer = WithdrawalAuthorizer::new(
            ProtocolVersion::V1,
            vk,
            Amount::ETHER,
            Duration::from_secs(5),
            Duration::from_secs(5),
            Arc::new(RwLock::new(registry)),
            storage.nullifiers().clone(),
            DigestVerifier,
            ledger.clone(),
        );

        Fixture {
            authorizer,
            ledger,
            bundle,
            _storage: storage,
        }
    }

    #[tokio::test]
    async fn test_withdraw_then_replay() {
        let f = fixture().await;

        let record = f.authorizer.withdraw(RECIPIENT, &f.bundle).await.unwrap();
        assert_eq!(record.recipient, RECIPIENT);
        assert_eq!(record.root_seq, 0);
        assert_eq!(f.ledger.balance(&RECIPIENT), Amount::ETHER);
        assert_eq!(
            f.authorizer.nullifiers().payment(&record.nullifier).unwrap(),
            Some(PaymentStatus::Paid)
        );

        let err = f.authorizer.withdraw(RECIPIENT, &f.bundle).await.unwrap_err();
        assert!(matches!(err, PoolError::AlreadySpent(_)));
        assert_eq!(f.ledger.balance(&RECIPIENT), Amount::ETHER);
    }

    #[tokio::test]
    async fn test_substituted_proof_rejected() {
        let f = fixture().await;
        let mut bundle = f.bundle.clone();
        bundle.proof[0] ^= 0xff;

        let err = f.authorizer.withdraw(RECIPIENT, &bundle).await.unwrap_err();
        assert!(matches!(err, PoolError::InvalidProof));
        // a rejected proof spends nothing
        assert!(f.authorizer.nullifiers().is_empty());
    }
}
