//! pool configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::accumulator::MAX_DEPTH;
use crate::error::{PoolError, Result};
use crate::proof::ProtocolVersion;
use crate::types::{Address, Amount};

/// default merkle depth, 2^20 deposits
pub const DEFAULT_TREE_DEPTH: u8 = 20;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// the only account allowed to publish roots
    pub publisher: Address,

    /// fixed deposit / withdrawal amount, in base units
    #[serde(default = "default_denomination")]
    pub denomination: Amount,

    /// must match the circuit's merkle depth
    #[serde(default = "default_tree_depth")]
    pub tree_depth: u8,

    #[serde(default)]
    pub protocol: ProtocolVersion,

    /// upper bound on one proof verification
    #[serde(default = "default_engine_timeout_ms")]
    pub engine_timeout_ms: u64,

    /// upper bound on one ledger debit or credit
    #[serde(default = "default_ledger_timeout_ms")]
    pub ledger_timeout_ms: u64,

    /// sled database directory
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_denomination() -> Amount {
    Amount::ETHER
}

fn default_tree_depth() -> u8 {
    DEFAULT_TREE_DEPTH
}

fn default_engine_timeout_ms() -> u64 {
    30_000
}

fn default_ledger_timeout_ms() -> u64 {
    10_000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./laundeth.db")
}

impl PoolConfig {
    /// defaults for everything except the publisher
    pub fn new(publisher: Address) -> Self {
        Self {
            publisher,
            denomination: default_denomination(),
            tree_depth: default_tree_depth(),
            protocol: ProtocolVersion::default(),
            engine_timeout_ms: default_engine_timeout_ms(),
            ledger_timeout_ms: default_ledger_timeout_ms(),
            db_path: default_db_path(),
        }
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_timeout_ms)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tree_depth == 0 || self.tree_depth > MAX_DEPTH {
            return Err(PoolError::Config(format!(
                "tree_depth must be in 1..={}, got {}",
                MAX_DEPTH, self.tree_depth
            )));
        }
        if self.denomination.is_zero() {
            return Err(PoolError::Config("denomination must be non-zero".into()));
        }
        if self.engine_timeout_ms == 0 || self.ledger_timeout_ms == 0 {
            return Err(PoolError::Config("timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = PoolConfig::new(Address([1; 20]));
        config.validate().unwrap();
        assert_eq!(config.denomination, Amount::ETHER);
        assert_eq!(config.engine_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = PoolConfig::new(Address([1; 20]));
        config.tree_depth = 0;
        assert!(config.validate().is_err());

        let mut config = PoolConfig::new(Address([1; 20]));
        config.denomination = Amount::ZERO;
        assert!(config.validate().is_err());

        let mut config = PoolConfig::new(Address([1; 20]));
        config.ledger_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
