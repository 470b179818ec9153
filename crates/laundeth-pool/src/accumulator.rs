//! commitment accumulator
//!
//! fixed-depth, append-only sha256 merkle tree over admitted commitments.
//! positions past the last leaf hold the zero leaf, so the root over any
//! prefix is a pure function of that prefix.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{PoolError, Result};
use crate::types::{Commitment, LeafIndex, Root};

/// largest supported tree depth
pub const MAX_DEPTH: u8 = 32;

/// `sha256(left || right)`
pub fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// roots of all-empty subtrees, index = subtree height
fn empty_roots(depth: u8) -> Vec<[u8; 32]> {
    let mut empty = Vec::with_capacity(depth as usize + 1);
    empty.push([0u8; 32]);
    for h in 0..depth as usize {
        let below = empty[h];
        empty.push(hash_pair(&below, &below));
    }
    empty
}

/// everything a prover needs to show a commitment is under a root
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipWitness {
    pub leaf_index: LeafIndex,
    pub commitment: Commitment,
    /// prefix length the root was computed over
    pub prefix_len: u64,
    /// sibling hashes from leaf to root
    pub siblings: Vec<[u8; 32]>,
    /// true when the running node is the right child at that level
    pub directions: Vec<bool>,
    pub root: Root,
}

impl MembershipWitness {
    /// fold the path and compare with the claimed root
    pub fn verify(&self) -> bool {
        if self.siblings.len() != self.directions.len() {
            return false;
        }

        let mut current = self.commitment.0;
        for (sibling, is_right) in self.siblings.iter().zip(&self.directions) {
            current = if *is_right {
                hash_pair(sibling, &current)
            } else {
                hash_pair(&current, sibling)
            };
        }

        current == self.root.0
    }
}

/// append-only commitment tree
pub struct Accumulator {
    depth: u8,
    leaves: Vec<Commitment>,
    positions: HashMap<Commitment, LeafIndex>,
    empty: Vec<[u8; 32]>,
}

impl Accumulator {
    /// empty tree with the given depth
    pub fn new(depth: u8) -> Result<Self> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(PoolError::Config(format!(
                "tree depth must be in 1..={}, got {}",
                MAX_DEPTH, depth
            )));
        }

        Ok(Self {
            depth,
            leaves: Vec::new(),
            positions: HashMap::new(),
            empty: empty_roots(depth),
        })
    }

    /// rebuild from a commitment log in admission order
    pub fn from_leaves<I>(depth: u8, leaves: I) -> Result<Self>
    where
        I: IntoIterator<Item = Commitment>,
    {
        let mut acc = Self::new(depth)?;
        for commitment in leaves {
            acc.admit(commitment)?;
        }
        Ok(acc)
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// maximum number of leaves
    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    /// number of admitted commitments
    pub fn len(&self) -> u64 {
        self.leaves.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn position(&self, commitment: &Commitment) -> Option<LeafIndex> {
        self.positions.get(commitment).copied()
    }

    pub fn leaf(&self, index: LeafIndex) -> Option<Commitment> {
        self.leaves.get(index.0 as usize).copied()
    }

    /// index the commitment would get, without appending
    pub fn check_admissible(&self, commitment: &Commitment) -> Result<LeafIndex> {
        // the zero leaf pads the tree; admitting it would not move the root
        if commitment.0 == [0u8; 32] {
            return Err(PoolError::ReservedCommitment);
        }
        if let Some(existing) = self.position(commitment) {
            return Err(PoolError::DuplicateCommitment(existing));
        }
        if self.len() >= self.capacity() {
            return Err(PoolError::TreeFull(self.capacity()));
        }
        Ok(LeafIndex(self.len()))
    }

    /// append a commitment at the next free index
    pub fn admit(&mut self, commitment: Commitment) -> Result<LeafIndex> {
        let index = self.check_admissible(&commitment)?;
        self.leaves.push(commitment);
        self.positions.insert(commitment, index);
        debug!(index = index.0, %commitment, "admitted commitment");
        Ok(index)
    }

    /// root over the whole tree
    pub fn root(&self) -> Root {
        let levels = self.fold(self.leaves.len());
        self.top_of(&levels)
    }

    /// root over the first `prefix_len` commitments
    pub fn root_at(&self, prefix_len: u64) -> Result<Root> {
        self.check_prefix(prefix_len)?;
        let levels = self.fold(prefix_len as usize);
        Ok(self.top_of(&levels))
    }

    /// inclusion witness for `leaf_index` under `root_at(prefix_len)`
    pub fn membership_witness(&self, leaf_index: LeafIndex, prefix_len: u64) -> Result<MembershipWitness> {
        self.check_prefix(prefix_len)?;
        if leaf_index.0 >= prefix_len {
            return Err(PoolError::IndexOutOfRange {
                index: leaf_index.0,
                prefix_len,
            });
        }

        let levels = self.fold(prefix_len as usize);
        let mut siblings = Vec::with_capacity(self.depth as usize);
        let mut directions = Vec::with_capacity(self.depth as usize);
        let mut pos = leaf_index.0 as usize;

        for (height, level) in levels.iter().take(self.depth as usize).enumerate() {
            let sibling = level.get(pos ^ 1).copied().unwrap_or(self.empty[height]);
            siblings.push(sibling);
            directions.push(pos & 1 == 1);
            pos >>= 1;
        }

        Ok(MembershipWitness {
            leaf_index,
            commitment: self.leaves[leaf_index.0 as usize],
            prefix_len,
            siblings,
            directions,
            root: self.top_of(&levels),
        })
    }

    fn check_prefix(&self, prefix_len: u64) -> Result<()> {
        if prefix_len > self.len() {
            return Err(PoolError::IndexOutOfRange {
                index: prefix_len,
                prefix_len: self.len(),
            });
        }
        Ok(())
    }

    fn top_of(&self, levels: &[Vec<[u8; 32]>]) -> Root {
        let top = levels
            .last()
            .and_then(|level| level.first().copied())
            .unwrap_or(self.empty[self.depth as usize]);
        Root(top)
    }

    /// all non-empty nodes level by level, leaves first
    ///
    /// returns `depth + 1` levels; missing right children are empty subtrees
    fn fold(&self, prefix_len: usize) -> Vec<Vec<[u8; 32]>> {
        let mut levels = Vec::with_capacity(self.depth as usize + 1);
        levels.push(self.leaves[..prefix_len].iter().map(|c| c.0).collect::<Vec<_>>());

        for height in 0..self.depth as usize {
            let current = &levels[height];
            let mut next = Vec::with_capacity((current.len() + 1) / 2);
            for pair in current.chunks(2) {
                let right = pair.get(1).unwrap_or(&self.empty[height]);
                next.push(hash_pair(&pair[0], right));
            }
            levels.push(next);
        }

        levels
    }
}
