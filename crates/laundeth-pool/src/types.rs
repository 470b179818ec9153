//! shared value types
//!
//! all 32-byte hashes are surfaced to the circuit as eight big-endian `u32`
//! words, so every hash type converts to and from `[u32; 8]`

use core::fmt;
use core::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PoolError, Result};

/// number of `u32` words a 32-byte hash is split into
pub const HASH_WORDS: usize = 8;

/// strip an optional `0x` prefix
fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

fn parse_hex_array<const N: usize>(s: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(strip_hex_prefix(s.trim()))
        .map_err(|e| PoolError::Serialization(format!("hex: {}", e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        PoolError::Serialization(format!("expected {} bytes, got {}", N, b.len()))
    })
}

/// split 32 bytes into big-endian `u32` words
pub fn bytes_to_words(bytes: &[u8; 32]) -> [u32; HASH_WORDS] {
    let mut words = [0u32; HASH_WORDS];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

/// join big-endian `u32` words back into 32 bytes
pub fn words_to_bytes(words: &[u32; HASH_WORDS]) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    for (chunk, word) in bytes.chunks_exact_mut(4).zip(words.iter()) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    bytes
}

/// hex string in human-readable formats, raw bytes otherwise
macro_rules! serde_as_hex {
    ($name:ident, $len:expr) => {
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, s: S) -> core::result::Result<S::Ok, S::Error> {
                if s.is_human_readable() {
                    s.serialize_str(&format!("0x{}", hex::encode(self.0)))
                } else {
                    self.0.serialize(s)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(d: D) -> core::result::Result<Self, D::Error> {
                if d.is_human_readable() {
                    let s = String::deserialize(d)?;
                    s.parse().map_err(de::Error::custom)
                } else {
                    <[u8; $len]>::deserialize(d).map(Self)
                }
            }
        }
    };
}

macro_rules! hash_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 32]);

        serde_as_hex!($name, 32);

        impl $name {
            pub fn to_bytes(&self) -> [u8; 32] {
                self.0
            }

            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn to_words(&self) -> [u32; HASH_WORDS] {
                bytes_to_words(&self.0)
            }

            pub fn from_words(words: &[u32; HASH_WORDS]) -> Self {
                Self(words_to_bytes(words))
            }

            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(&self.0[..8]))
            }
        }

        impl FromStr for $name {
            type Err = PoolError;

            fn from_str(s: &str) -> Result<Self> {
                parse_hex_array(s).map(Self)
            }
        }
    };
}

hash_newtype!(
    /// hiding commitment to a deposit note
    Commitment
);

hash_newtype!(
    /// one-way tag of a note, revealed once on withdrawal
    Nullifier
);

hash_newtype!(
    /// root of the commitment accumulator over some prefix
    Root
);

/// position of a commitment in the accumulator
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LeafIndex(pub u64);

impl LeafIndex {
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for LeafIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 20-byte account identity on the ledger
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

serde_as_hex!(Address, 20);

impl Address {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 20] {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        parse_hex_array(s).map(Self)
    }
}

/// amount in the ledger's base unit
///
/// human-readable formats use a decimal string, since toml has no u128
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(pub u128);

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, s: S) -> core::result::Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&self.0.to_string())
        } else {
            s.serialize_u128(self.0)
        }
    }
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative integer or decimal string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> core::result::Result<Amount, E> {
        Ok(Amount(v as u128))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> core::result::Result<Amount, E> {
        u128::try_from(v).map(Amount).map_err(E::custom)
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> core::result::Result<Amount, E> {
        Ok(Amount(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> core::result::Result<Amount, E> {
        v.trim().parse::<u128>().map(Amount).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(d: D) -> core::result::Result<Self, D::Error> {
        if d.is_human_readable() {
            d.deserialize_any(AmountVisitor)
        } else {
            d.deserialize_u128(AmountVisitor)
        }
    }
}

impl Amount {
    pub const ZERO: Self = Self(0);

    /// 10^18 base units
    pub const ETHER: Self = Self(1_000_000_000_000_000_000);

    pub fn new(amount: u128) -> Self {
        Self(amount)
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<u128> for Amount {
    fn from(v: u128) -> Self {
        Self(v)
    }
}

impl From<u64> for Amount {
    fn from(v: u64) -> Self {
        Self(v as u128)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// circuit field element, 32 bytes big-endian
///
/// zokrates emits these as `0x`-prefixed 64-digit hex strings
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldElement(pub [u8; 32]);

serde_as_hex!(FieldElement, 32);

impl FieldElement {
    pub fn from_u32(value: u32) -> Self {
        let mut bytes = [0u8; 32];
        bytes[28..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    /// value as a u32, if it fits
    pub fn to_u32(&self) -> Option<u32> {
        if self.0[..28].iter().any(|b| *b != 0) {
            return None;
        }
        Some(u32::from_be_bytes([self.0[28], self.0[29], self.0[30], self.0[31]]))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_u32() {
            Some(v) => write!(f, "FieldElement({})", v),
            None => write!(f, "FieldElement({})", self.to_hex()),
        }
    }
}

impl FromStr for FieldElement {
    type Err = PoolError;

    /// accepts `0x` hex (left-padded to 32 bytes) or a decimal u32
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.starts_with("0x") || s.starts_with("0X") {
            let digits = strip_hex_prefix(s);
            if digits.len() > 64 {
                return Err(PoolError::Serialization(format!(
                    "field element too long: {} hex digits",
                    digits.len()
                )));
            }
            let padded = format!("{:0>64}", digits);
            return parse_hex_array(&padded).map(Self);
        }
        s.parse::<u32>()
            .map(Self::from_u32)
            .map_err(|e| PoolError::Serialization(format!("field element: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_roundtrip_big_endian() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x12;
        bytes[3] = 0x34;
        bytes[31] = 0xff;
        let words = bytes_to_words(&bytes);
        assert_eq!(words[0], 0x1200_0034);
        assert_eq!(words[7], 0x0000_00ff);
        assert_eq!(words_to_bytes(&words), bytes);
    }

    #[test]
    fn test_hash_hex_parsing() {
        let root = Root([7u8; 32]);
        let shown = root.to_string();
        assert!(shown.starts_with("0x"));
        assert_eq!(shown.parse::<Root>().unwrap(), root);
        // prefix is optional
        assert_eq!(shown[2..].parse::<Root>().unwrap(), root);
        assert!("0x1234".parse::<Root>().is_err());
    }

    #[test]
    fn test_address_parsing() {
        let addr: Address = "0x00000000000000000000000000000000000000aa".parse().unwrap();
        assert_eq!(addr.0[19], 0xaa);
        assert!("0xaa".parse::<Address>().is_err());
    }

    #[test]
    fn test_human_readable_serde() {
        let addr = Address([0xab; 20]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "ab".repeat(20)));
        assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), addr);

        let amount: Amount = serde_json::from_str("\"1000000000000000000\"").unwrap();
        assert_eq!(amount, Amount::ETHER);
        let amount: Amount = serde_json::from_str("7").unwrap();
        assert_eq!(amount, Amount(7));

        // binary encoding stays compact
        let bytes = bincode::serialize(&Root([1; 32])).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bincode::deserialize::<Root>(&bytes).unwrap(), Root([1; 32]));
    }

    #[test]
    fn test_field_element_formats() {
        let fe: FieldElement = "0x00000000000000000000000000000000000000000000000000000000deadbeef"
            .parse()
            .unwrap();
        assert_eq!(fe.to_u32(), Some(0xdead_beef));

        let short: FieldElement = "0x2a".parse().unwrap();
        assert_eq!(short.to_u32(), Some(42));

        let dec: FieldElement = "42".parse().unwrap();
        assert_eq!(dec, short);

        let big: FieldElement = "0x0100000000".parse().unwrap();
        assert_eq!(big.to_u32(), None);
    }
}
