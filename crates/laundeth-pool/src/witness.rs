//! circuit input hand-off
//!
//! typed replacement for the text file fed to `zokrates compute-witness -a`.
//! line order is fixed by the circuit:
//!
//! ```text
//! root words          (public)
//! nullifier hash      (public)
//! nullifier preimage
//! secret
//! commitment
//! path directions     0 = left, 1 = right
//! sibling words       one line per level, leaf to root
//! ```

use serde::{Deserialize, Serialize};

use crate::accumulator::MembershipWitness;
use crate::error::{PoolError, Result};
use crate::note::DepositNote;
use crate::types::{bytes_to_words, Nullifier, Root, HASH_WORDS};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitInput {
    pub root: Root,
    pub nullifier_hash: Nullifier,
    pub nullifier: [u32; HASH_WORDS],
    pub secret: [u32; HASH_WORDS],
    pub commitment: [u32; HASH_WORDS],
    pub directions: Vec<bool>,
    pub siblings: Vec<[u32; HASH_WORDS]>,
}

impl CircuitInput {
    /// combine the depositor's note with an inclusion witness
    pub fn new(note: &DepositNote, witness: &MembershipWitness) -> Result<Self> {
        let commitment = note.commitment();
        if commitment != witness.commitment {
            return Err(PoolError::UnknownCommitment(commitment));
        }

        Ok(Self {
            root: witness.root,
            nullifier_hash: note.nullifier_hash(),
            nullifier: bytes_to_words(&note.nullifier),
            secret: bytes_to_words(&note.secret),
            commitment: commitment.to_words(),
            directions: witness.directions.clone(),
            siblings: witness.siblings.iter().map(bytes_to_words).collect(),
        })
    }

    /// one string per line, space separated
    pub fn to_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(6 + self.siblings.len());
        lines.push(join_words(&self.root.to_words()));
        lines.push(join_words(&self.nullifier_hash.to_words()));
        lines.push(join_words(&self.nullifier));
        lines.push(join_words(&self.secret));
        lines.push(join_words(&self.commitment));
        lines.push(
            self.directions
                .iter()
                .map(|right| if *right { "1" } else { "0" })
                .collect::<Vec<_>>()
                .join(" "),
        );
        for sibling in &self.siblings {
            lines.push(join_words(sibling));
        }
        lines
    }

    /// flat argument list for `compute-witness -a`
    pub fn to_args(&self) -> Vec<String> {
        self.to_lines()
            .iter()
            .flat_map(|line| line.split(' ').map(str::to_owned).collect::<Vec<_>>())
            .filter(|arg| !arg.is_empty())
            .collect()
    }
}

fn join_words(words: &[u32; HASH_WORDS]) -> String {
    words
        .iter()
        .map(|w| w.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
