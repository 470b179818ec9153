//! deposit notes
//!
//! a note is the depositor's private opening of a commitment. it never
//! leaves the depositor; only the commitment is admitted and only the
//! nullifier hash is revealed on withdrawal.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{Commitment, Nullifier};

/// private opening of a deposit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositNote {
    /// nullifier preimage
    #[serde(with = "hex_bytes")]
    pub nullifier: [u8; 32],
    /// blinding secret
    #[serde(with = "hex_bytes")]
    pub secret: [u8; 32],
}

impl DepositNote {
    pub fn new(nullifier: [u8; 32], secret: [u8; 32]) -> Self {
        Self { nullifier, secret }
    }

    /// fresh note from a cryptographic rng
    pub fn random<R: RngCore>(rng: &mut R) -> Self {
        let mut nullifier = [0u8; 32];
        let mut secret = [0u8; 32];
        rng.fill_bytes(&mut nullifier);
        rng.fill_bytes(&mut secret);
        Self { nullifier, secret }
    }

    /// note from integer values, each encoded as 32 bytes big-endian
    pub fn from_integers(nullifier: u128, secret: u128) -> Self {
        Self {
            nullifier: u128_to_bytes32(nullifier),
            secret: u128_to_bytes32(secret),
        }
    }

    /// `sha256(nullifier || secret)`
    pub fn commitment(&self) -> Commitment {
        let mut hasher = Sha256::new();
        hasher.update(self.nullifier);
        hasher.update(self.secret);
        Commitment(hasher.finalize().into())
    }

    /// `sha256(nullifier || 0^32)`, the value published on withdrawal
    pub fn nullifier_hash(&self) -> Nullifier {
        let mut hasher = Sha256::new();
        hasher.update(self.nullifier);
        hasher.update([0u8; 32]);
        Nullifier(hasher.finalize().into())
    }
}

fn u128_to_bytes32(value: u128) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[16..].copy_from_slice(&value.to_be_bytes());
    bytes
}

mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected 32 bytes"))
    }
}
