//! state survives closing and reopening the store

mod common;

use common::*;
use laundeth_pool::{Commitment, DepositNote, DigestVerifier, PaymentStatus, PoolError, Storage};

#[tokio::test]
async fn test_reopen_restores_tree_roots_and_nullifiers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.db");
    let note = DepositNote::from_integers(31, 32);

    let (old_root, current_root) = {
        let pool = open_pool(Storage::open(&path).unwrap(), DigestVerifier, funded_ledger(CreditMode::Pay));
        pool.deposit(ALICE, note.commitment()).await.unwrap();
        let old = pool.publish_root(OPERATOR).unwrap();
        pool.deposit(ALICE, Commitment([9; 32])).await.unwrap();
        pool.publish_root(OPERATOR).unwrap();

        pool.withdraw(BOB, &bundle_for(&note, &old.root)).await.unwrap();
        pool.flush().unwrap();
        (old.root, pool.current_root())
    };

    let pool = open_pool(Storage::open(&path).unwrap(), DigestVerifier, funded_ledger(CreditMode::Pay));
    assert_eq!(pool.current_root(), current_root);
    assert!(pool.is_known_root(&old_root));
    assert_eq!(pool.registry_entries().len(), 2);

    // spent before the restart, still spent after
    let err = pool.withdraw(BOB, &bundle_for(&note, &old_root)).await.unwrap_err();
    assert!(matches!(err, PoolError::AlreadySpent(_)));

    // admission continues after the restored leaves
    let index = pool.deposit(ALICE, Commitment([10; 32])).await.unwrap();
    assert_eq!(index.0, 2);
}

#[tokio::test]
async fn test_interrupted_payment_recovered_as_unresolved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.db");
    let note = DepositNote::from_integers(41, 42);

    {
        let pool = open_pool(Storage::open(&path).unwrap(), DigestVerifier, funded_ledger(CreditMode::Pay));
        pool.deposit(ALICE, note.commitment()).await.unwrap();
        pool.publish_root(OPERATOR).unwrap();
        pool.withdraw(BOB, &bundle_for(&note, &pool.current_root())).await.unwrap();

        // simulate a crash between accepting and settling
        pool.nullifiers()
            .set_payment(&note.nullifier_hash(), &PaymentStatus::Pending)
            .unwrap();
        pool.flush().unwrap();
    }

    let pool = open_pool(Storage::open(&path).unwrap(), DigestVerifier, funded_ledger(CreditMode::Pay));
    let unresolved = pool.unresolved_payments().unwrap();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].0.nullifier, note.nullifier_hash());
}
