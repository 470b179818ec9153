//! the pool service
//!
//! wires accumulator, registry and authorizer over one durable store.
//!
//! lock order is accumulator before registry. deposits are additionally
//! serialized by an async admission lock so a debit can be awaited between
//! validating and appending a commitment.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::accumulator::{Accumulator, MembershipWitness};
use crate::authorizer::WithdrawalAuthorizer;
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::ledger::Ledger;
use crate::nullifier::{NullifierSet, WithdrawalRecord};
use crate::proof::{ProofBundle, ProofVerifier, VerificationKey};
use crate::registry::{Publication, RegistryEntry, RootRegistry};
use crate::storage::Storage;
use crate::types::{Address, Commitment, LeafIndex, Nullifier, Root};

/// snapshot for operators
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    pub leaf_count: u64,
    pub capacity: u64,
    pub current_root: Root,
    pub latest: Option<RegistryEntry>,
    pub published: usize,
    pub spent: usize,
    pub unresolved: usize,
}

pub struct ShieldedPool<V, L> {
    config: PoolConfig,
    storage: Storage,
    accumulator: Arc<RwLock<Accumulator>>,
    registry: Arc<RwLock<RootRegistry>>,
    admission: Mutex<()>,
    ledger: Arc<L>,
    authorizer: WithdrawalAuthorizer<V, L>,
}

impl<V: ProofVerifier, L: Ledger> ShieldedPool<V, L> {
    /// restore state from `storage` and wire the collaborators
    pub fn open(
        config: PoolConfig,
        storage: Storage,
        vk: VerificationKey,
        verifier: V,
        ledger: Arc<L>,
    ) -> Result<Self> {
        config.validate()?;

        let accumulator = Accumulator::from_leaves(config.tree_depth, storage.load_commitments()?)?;
        let registry = RootRegistry::from_entries(config.publisher, storage.load_roots()?)?;
        for entry in registry.entries() {
            let recomputed = accumulator.root_at(entry.leaf_count)?;
            if recomputed != entry.root {
                return Err(PoolError::Storage(format!(
                    "root log diverges from commitment log at seq {}",
                    entry.seq
                )));
            }
        }

        let interrupted = storage.nullifiers().recover_interrupted()?;
        if interrupted > 0 {
            warn!(interrupted, "found withdrawals with unsettled payments");
        }

        info!(
            leaves = accumulator.len(),
            roots = registry.len(),
            spent = storage.nullifiers().len(),
            "pool opened"
        );

        let registry = Arc::new(RwLock::new(registry));
        let authorizer = WithdrawalAuthorizer::new(
            config.protocol,
            vk,
            config.denomination,
            config.engine_timeout(),
            config.ledger_timeout(),
            registry.clone(),
            storage.nullifiers().clone(),
            verifier,
            ledger.clone(),
        );

        Ok(Self {
            config,
            storage,
            accumulator: Arc::new(RwLock::new(accumulator)),
            registry,
            admission: Mutex::new(()),
            ledger,
            authorizer,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// admit a commitment after taking the denomination from `depositor`
    ///
    /// a failed or timed-out debit admits nothing. if the commitment cannot
    /// be persisted after the debit, the debit is refunded once and the
    /// outcome reported as `AdmissionFailed`
    pub async fn deposit(&self, depositor: Address, commitment: Commitment) -> Result<LeafIndex> {
        let _admission = self.admission.lock().await;

        let index = match self.accumulator.read().check_admissible(&commitment) {
            Ok(index) => index,
            Err(e) => {
                if e.is_benign() {
                    info!(%commitment, "already deposited");
                }
                return Err(e);
            }
        };

        let ledger_timeout = self.config.ledger_timeout();
        match timeout(ledger_timeout, self.ledger.debit(&depositor, self.config.denomination)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(%depositor, error = %e, "deposit debit failed");
                return Err(PoolError::LedgerTransferFailed {
                    reason: e.to_string(),
                    record: None,
                });
            }
            Err(_) => {
                warn!(%depositor, "deposit debit timed out");
                return Err(PoolError::LedgerTimeout {
                    timeout: ledger_timeout,
                    record: None,
                });
            }
        }

        if let Err(e) = self.storage.append_commitment(index, &commitment) {
            return Err(self.refund(depositor, &commitment, e).await);
        }
        let admitted = self.accumulator.write().admit(commitment)?;
        info!(index = admitted.0, %commitment, %depositor, "deposit admitted");
        Ok(admitted)
    }

    /// hand back a debit whose commitment could not be persisted
    async fn refund(&self, depositor: Address, commitment: &Commitment, cause: PoolError) -> PoolError {
        let reason = cause.to_string();
        let credited = timeout(
            self.config.ledger_timeout(),
            self.ledger.credit(&depositor, self.config.denomination),
        )
        .await;
        let refunded = matches!(credited, Ok(Ok(())));

        if refunded {
            warn!(%depositor, %commitment, %reason, "commitment not persisted, debit refunded");
        } else {
            error!(%depositor, %commitment, %reason, "commitment not persisted and refund failed, needs reconciliation");
        }
        PoolError::AdmissionFailed {
            depositor,
            reason,
            refunded,
        }
    }

    /// publish the accumulator's current root
    pub fn publish_root(&self, publisher: Address) -> Result<RegistryEntry> {
        let accumulator = self.accumulator.read();
        let root = accumulator.root();
        self.publish_locked(&accumulator, root, publisher)
    }

    /// publish a root computed elsewhere; it must equal the current root
    pub fn publish(&self, root: Root, publisher: Address) -> Result<RegistryEntry> {
        let accumulator = self.accumulator.read();
        self.publish_locked(&accumulator, root, publisher)
    }

    fn publish_locked(&self, accumulator: &Accumulator, root: Root, publisher: Address) -> Result<RegistryEntry> {
        let mut registry = self.registry.write();
        let publication = registry.prepare(root, publisher, accumulator, Utc::now()).map_err(|e| {
            warn!(%publisher, %root, error = %e, "root publication refused");
            e
        })?;

        match publication {
            Publication::New(entry) => {
                self.storage.append_root(&entry)?;
                registry.append(entry.clone())?;
                Ok(entry)
            }
            Publication::Existing(entry) => Ok(entry),
        }
    }

    pub fn is_known_root(&self, root: &Root) -> bool {
        self.registry.read().is_known(root)
    }

    pub fn latest_root(&self) -> Option<Root> {
        self.registry.read().latest()
    }

    pub fn registry_entries(&self) -> Vec<RegistryEntry> {
        self.registry.read().entries().to_vec()
    }

    pub fn current_root(&self) -> Root {
        self.accumulator.read().root()
    }

    pub fn position(&self, commitment: &Commitment) -> Option<LeafIndex> {
        self.accumulator.read().position(commitment)
    }

    /// inclusion witness for `commitment` under a published root
    pub fn membership_witness(&self, commitment: &Commitment, root: &Root) -> Result<MembershipWitness> {
        let accumulator = self.accumulator.read();
        let prefix_len = self
            .registry
            .read()
            .entry_for(root)
            .map(|entry| entry.leaf_count)
            .ok_or(PoolError::UnknownRoot(*root))?;
        let index = accumulator
            .position(commitment)
            .ok_or(PoolError::UnknownCommitment(*commitment))?;
        accumulator.membership_witness(index, prefix_len)
    }

    /// validate a proof bundle and pay the recipient
    pub async fn withdraw(&self, recipient: Address, bundle: &ProofBundle) -> Result<WithdrawalRecord> {
        self.authorizer.withdraw(recipient, bundle).await
    }

    pub fn nullifiers(&self) -> &NullifierSet {
        self.authorizer.nullifiers()
    }

    pub fn unresolved_payments(&self) -> Result<Vec<(WithdrawalRecord, String)>> {
        self.nullifiers().unresolved()
    }

    /// record that an unresolved payment was settled by hand
    pub fn mark_reconciled(&self, nullifier: &Nullifier) -> Result<WithdrawalRecord> {
        let record = self.nullifiers().mark_reconciled(nullifier)?;
        info!(%nullifier, recipient = %record.recipient, "payment reconciled");
        Ok(record)
    }

    pub fn status(&self) -> Result<PoolStatus> {
        let accumulator = self.accumulator.read();
        let registry = self.registry.read();
        Ok(PoolStatus {
            leaf_count: accumulator.len(),
            capacity: accumulator.capacity(),
            current_root: accumulator.root(),
            latest: registry.latest_entry().cloned(),
            published: registry.len(),
            spent: self.nullifiers().len(),
            unresolved: self.unresolved_payments()?.len(),
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.storage.flush()
    }
}
