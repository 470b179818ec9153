//! durable pool state on sled
//!
//! four trees:
//! - `commitments`: leaf index (be u64) -> commitment
//! - `roots`: registry seq (be u64) -> bincode(RegistryEntry)
//! - `nullifiers`: nullifier -> bincode(WithdrawalRecord)
//! - `payments`: nullifier -> bincode(PaymentStatus)
//!
//! big-endian keys keep sled's iteration order equal to insertion order.

use std::path::Path;

use tracing::info;

use crate::error::{PoolError, Result};
use crate::nullifier::NullifierSet;
use crate::registry::RegistryEntry;
use crate::types::{Commitment, LeafIndex};

pub struct Storage {
    db: sled::Db,
    commitments: sled::Tree,
    roots: sled::Tree,
    nullifiers: NullifierSet,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("opening storage at {}", path.as_ref().display());
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// throwaway store, removed on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let commitments = db.open_tree("commitments")?;
        let roots = db.open_tree("roots")?;
        let nullifiers = NullifierSet::new(db.open_tree("nullifiers")?, db.open_tree("payments")?);
        Ok(Self {
            db,
            commitments,
            roots,
            nullifiers,
        })
    }

    // ===== COMMITMENT LOG =====

    /// write a commitment at its index; an index is written at most once
    pub fn append_commitment(&self, index: LeafIndex, commitment: &Commitment) -> Result<()> {
        self.commitments
            .compare_and_swap(index.to_be_bytes(), None as Option<&[u8]>, Some(commitment.as_ref()))?
            .map_err(|_| PoolError::Storage(format!("leaf {} already written", index)))?;
        self.commitments.flush()?;
        Ok(())
    }

    /// all commitments in admission order
    pub fn load_commitments(&self) -> Result<Vec<Commitment>> {
        let mut out = Vec::with_capacity(self.commitments.len());
        for (expected, item) in self.commitments.iter().enumerate() {
            let (key, value) = item?;
            let index = be_u64(&key)?;
            if index != expected as u64 {
                return Err(PoolError::Storage(format!(
                    "commitment log gap: expected leaf {}, found {}",
                    expected, index
                )));
            }
            let bytes: [u8; 32] = value
                .as_ref()
                .try_into()
                .map_err(|_| PoolError::Storage(format!("leaf {} is not 32 bytes", index)))?;
            out.push(Commitment(bytes));
        }
        Ok(out)
    }

    // ===== ROOT LOG =====

    pub fn append_root(&self, entry: &RegistryEntry) -> Result<()> {
        let value = bincode::serialize(entry)?;
        self.roots
            .compare_and_swap(entry.seq.to_be_bytes(), None as Option<&[u8]>, Some(value))?
            .map_err(|_| PoolError::Storage(format!("root seq {} already written", entry.seq)))?;
        self.roots.flush()?;
        Ok(())
    }

    /// registry entries in sequence order
    pub fn load_roots(&self) -> Result<Vec<RegistryEntry>> {
        let mut out = Vec::with_capacity(self.roots.len());
        for item in self.roots.iter() {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    // ===== NULLIFIERS =====

    pub fn nullifiers(&self) -> &NullifierSet {
        &self.nullifiers
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn be_u64(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| PoolError::Storage(format!("bad key length {}", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, Root};
    use chrono::Utc;

    #[test]
    fn test_commitment_log_roundtrip() {
        let storage = Storage::temporary().unwrap();
        for i in 0..3u8 {
            storage
                .append_commitment(LeafIndex(i as u64), &Commitment([i; 32]))
                .unwrap();
        }

        let loaded = storage.load_commitments().unwrap();
        assert_eq!(loaded, vec![Commitment([0; 32]), Commitment([1; 32]), Commitment([2; 32])]);

        // an index cannot be overwritten
        assert!(storage.append_commitment(LeafIndex(1), &Commitment([9; 32])).is_err());
    }

    #[test]
    fn test_root_log_roundtrip() {
        let storage = Storage::temporary().unwrap();
        let entry = RegistryEntry {
            seq: 0,
            root: Root([4; 32]),
            publisher: Address([1; 20]),
            leaf_count: 1,
            published_at: Utc::now(),
        };
        storage.append_root(&entry).unwrap();
        assert_eq!(storage.load_roots().unwrap(), vec![entry.clone()]);
        assert!(storage.append_root(&entry).is_err());
    }

    #[test]
    fn test_reopen_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = Storage::open(dir.path()).unwrap();
            storage.append_commitment(LeafIndex(0), &Commitment([1; 32])).unwrap();
            storage.flush().unwrap();
        }
        let storage = Storage::open(dir.path()).unwrap();
        assert_eq!(storage.load_commitments().unwrap(), vec![Commitment([1; 32])]);
    }
}
