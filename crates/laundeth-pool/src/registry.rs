//! root registry
//!
//! ordered log of published accumulator roots. only the configured
//! publisher may append, and only the root the accumulator currently
//! folds to. withdrawals may reference any published root.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::accumulator::Accumulator;
use crate::error::{PoolError, Result};
use crate::types::{Address, Root};

/// one published root
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// contiguous from 0
    pub seq: u64,
    pub root: Root,
    pub publisher: Address,
    /// number of leaves the root covers
    pub leaf_count: u64,
    pub published_at: DateTime<Utc>,
}

/// outcome of validating a publication
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Publication {
    /// a new entry to append
    New(RegistryEntry),
    /// the root is already at the head
    Existing(RegistryEntry),
}

pub struct RootRegistry {
    publisher: Address,
    entries: Vec<RegistryEntry>,
    /// root -> first sequence that published it
    index: HashMap<Root, u64>,
}

impl RootRegistry {
    pub fn new(publisher: Address) -> Self {
        Self {
            publisher,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// rebuild from a stored entry log
    pub fn from_entries<I>(publisher: Address, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = RegistryEntry>,
    {
        let mut registry = Self::new(publisher);
        for entry in entries {
            registry.append(entry)?;
        }
        Ok(registry)
    }

    pub fn publisher(&self) -> Address {
        self.publisher
    }

    /// validate a publication against the accumulator's current state
    ///
    /// nothing is appended; see [`RootRegistry::append`]
    pub fn prepare(
        &self,
        root: Root,
        publisher: Address,
        accumulator: &Accumulator,
        now: DateTime<Utc>,
    ) -> Result<Publication> {
        if publisher != self.publisher {
            return Err(PoolError::Unauthorized(publisher));
        }

        let leaf_count = accumulator.len();
        let expected = accumulator.root_at(leaf_count)?;
        if root != expected {
            return Err(PoolError::RootMismatch {
                expected,
                claimed: root,
            });
        }

        if let Some(head) = self.entries.last() {
            if head.root == root {
                return Ok(Publication::Existing(head.clone()));
            }
        }

        Ok(Publication::New(RegistryEntry {
            seq: self.entries.len() as u64,
            root,
            publisher,
            leaf_count,
            published_at: now,
        }))
    }

    /// append a prepared entry
    pub fn append(&mut self, entry: RegistryEntry) -> Result<()> {
        let expected_seq = self.entries.len() as u64;
        if entry.seq != expected_seq {
            return Err(PoolError::Storage(format!(
                "registry gap: expected seq {}, got {}",
                expected_seq, entry.seq
            )));
        }

        info!(seq = entry.seq, root = %entry.root, leaves = entry.leaf_count, "root published");
        self.index.entry(entry.root).or_insert(entry.seq);
        self.entries.push(entry);
        Ok(())
    }

    /// validate and append in one step
    pub fn publish(
        &mut self,
        root: Root,
        publisher: Address,
        accumulator: &Accumulator,
        now: DateTime<Utc>,
    ) -> Result<RegistryEntry> {
        match self.prepare(root, publisher, accumulator, now)? {
            Publication::New(entry) => {
                self.append(entry.clone())?;
                Ok(entry)
            }
            Publication::Existing(entry) => Ok(entry),
        }
    }

    /// true for any root ever published, not just the latest
    pub fn is_known(&self, root: &Root) -> bool {
        self.index.contains_key(root)
    }

    pub fn entry_for(&self, root: &Root) -> Option<&RegistryEntry> {
        self.index
            .get(root)
            .and_then(|seq| self.entries.get(*seq as usize))
    }

    pub fn get(&self, seq: u64) -> Option<&RegistryEntry> {
        self.entries.get(seq as usize)
    }

    /// most recent root; advisory only
    pub fn latest(&self) -> Option<Root> {
        self.entries.last().map(|entry| entry.root)
    }

    pub fn latest_entry(&self) -> Option<&RegistryEntry> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Commitment;

    const OWNER: Address = Address([1u8; 20]);
    const OTHER: Address = Address([2u8; 20]);

    fn tree_with(n: u8) -> Accumulator {
        Accumulator::from_leaves(3, (1..=n).map(|i| Commitment([i; 32]))).unwrap()
    }

    #[test]
    fn test_publish_current_root() {
        let acc = tree_with(1);
        let mut registry = RootRegistry::new(OWNER);

        let entry = registry.publish(acc.root(), OWNER, &acc, Utc::now()).unwrap();
        assert_eq!(entry.seq, 0);
        assert_eq!(entry.leaf_count, 1);
        assert!(registry.is_known(&acc.root()));
        assert_eq!(registry.latest(), Some(acc.root()));
    }

    #[test]
    fn test_unauthorized_publisher_leaves_no_entry() {
        let acc = tree_with(1);
        let mut registry = RootRegistry::new(OWNER);

        let err = registry.publish(acc.root(), OTHER, &acc, Utc::now()).unwrap_err();
        assert!(matches!(err, PoolError::Unauthorized(addr) if addr == OTHER));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_arbitrary_root_rejected() {
        let acc = tree_with(2);
        let mut registry = RootRegistry::new(OWNER);

        // root over a shorter prefix is not the current root
        let stale = acc.root_at(1).unwrap();
        let err = registry.publish(stale, OWNER, &acc, Utc::now()).unwrap_err();
        assert!(matches!(err, PoolError::RootMismatch { .. }));

        let err = registry.publish(Root([9u8; 32]), OWNER, &acc, Utc::now()).unwrap_err();
        assert!(matches!(err, PoolError::RootMismatch { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_older_roots_stay_known() {
        let mut acc = tree_with(1);
        let mut registry = RootRegistry::new(OWNER);

        let r1 = acc.root();
        registry.publish(r1, OWNER, &acc, Utc::now()).unwrap();

        acc.admit(Commitment([42u8; 32])).unwrap();
        let r2 = acc.root();
        let second = registry.publish(r2, OWNER, &acc, Utc::now()).unwrap();

        assert_eq!(second.seq, 1);
        assert!(registry.is_known(&r1));
        assert!(registry.is_known(&r2));
        assert_eq!(registry.entry_for(&r1).unwrap().seq, 0);
        assert_eq!(registry.latest(), Some(r2));
    }

    #[test]
    fn test_republishing_head_is_idempotent() {
        let acc = tree_with(2);
        let mut registry = RootRegistry::new(OWNER);

        let first = registry.publish(acc.root(), OWNER, &acc, Utc::now()).unwrap();
        let again = registry.publish(acc.root(), OWNER, &acc, Utc::now()).unwrap();
        assert_eq!(first, again);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_restore_rejects_gaps() {
        let acc = tree_with(1);
        let entry = RegistryEntry {
            seq: 1,
            root: acc.root(),
            publisher: OWNER,
            leaf_count: 1,
            published_at: Utc::now(),
        };
        assert!(RootRegistry::from_entries(OWNER, vec![entry]).is_err());
    }
}
