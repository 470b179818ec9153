//! shared fixtures for pool integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use laundeth_pool::{
    Address, Amount, DepositNote, DigestVerifier, Ledger, LedgerError, MemoryLedger, MembershipWitness,
    PoolConfig, ProofBundle, ProofVerifier, ProtocolVersion, PublicInputs, Result, Root, ShieldedPool,
    Storage, VerificationKey,
};

pub const OPERATOR: Address = Address([0xaa; 20]);
pub const ALICE: Address = Address([0x01; 20]);
pub const BOB: Address = Address([0x02; 20]);
pub const CAROL: Address = Address([0x03; 20]);

pub const TREE_DEPTH: u8 = 4;

pub fn vk() -> VerificationKey {
    VerificationKey(b"integration-vk".to_vec())
}

pub fn config() -> PoolConfig {
    let mut config = PoolConfig::new(OPERATOR);
    config.tree_depth = TREE_DEPTH;
    config.engine_timeout_ms = 500;
    config.ledger_timeout_ms = 500;
    config
}

/// bundle the development engine accepts for `note` under `root`
pub fn bundle_for(note: &DepositNote, root: &Root) -> ProofBundle {
    let inputs = PublicInputs::for_statement(ProtocolVersion::V1, root, &note.nullifier_hash());
    ProofBundle::new(DigestVerifier::prove(&inputs, &vk()), inputs)
}

pub fn bundle_from_witness(note: &DepositNote, witness: &MembershipWitness) -> ProofBundle {
    bundle_for(note, &witness.root)
}

/// counts calls, optionally sleeps, then defers to the digest engine
#[derive(Default)]
pub struct CountingVerifier {
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
}

impl CountingVerifier {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Some(delay),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProofVerifier for CountingVerifier {
    async fn verify(&self, inputs: &PublicInputs, proof: &[u8], vk: &VerificationKey) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        DigestVerifier.verify(inputs, proof, vk).await
    }
}

/// how the scripted ledger answers credits
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreditMode {
    Pay,
    Reject,
    Hang,
}

/// memory ledger whose credit side can fail or stall
pub struct ScriptedLedger {
    pub inner: MemoryLedger,
    pub credit: CreditMode,
    pub reject_debits: bool,
    pub hang_debits: bool,
}

impl ScriptedLedger {
    pub fn new(credit: CreditMode) -> Self {
        Self {
            inner: MemoryLedger::new(),
            credit,
            reject_debits: false,
            hang_debits: false,
        }
    }
}

#[async_trait]
impl Ledger for ScriptedLedger {
    async fn debit(&self, depositor: &Address, amount: Amount) -> std::result::Result<(), LedgerError> {
        if self.reject_debits {
            return Err(LedgerError::Rejected("debits disabled".into()));
        }
        if self.hang_debits {
            std::future::pending::<()>().await;
        }
        self.inner.debit(depositor, amount).await
    }

    async fn credit(&self, recipient: &Address, amount: Amount) -> std::result::Result<(), LedgerError> {
        match self.credit {
            CreditMode::Pay => self.inner.credit(recipient, amount).await,
            CreditMode::Reject => Err(LedgerError::Rejected("recipient account frozen".into())),
            CreditMode::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

pub fn open_pool<V: ProofVerifier>(
    storage: Storage,
    verifier: V,
    ledger: Arc<ScriptedLedger>,
) -> ShieldedPool<V, ScriptedLedger> {
    ShieldedPool::open(config(), storage, vk(), verifier, ledger).unwrap()
}

pub fn funded_ledger(credit: CreditMode) -> Arc<ScriptedLedger> {
    let ledger = ScriptedLedger::new(credit);
    ledger.inner.fund(ALICE, Amount::new(100 * Amount::ETHER.0));
    Arc::new(ledger)
}
