//! laundeth shielded pool
//!
//! fixed-denomination deposit/withdraw pool. depositors append a commitment
//! to an append-only merkle accumulator; later anyone holding the note can
//! withdraw to a fresh address by proving membership under a published root
//! without revealing which leaf is theirs.
//!
//! # architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SHIELDED POOL                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  deposit                                                     │
//! │  ├─ ledger debit (one denomination)                          │
//! │  └─ commitment accumulator (append-only, fixed depth)        │
//! │                                                              │
//! │  publish                                                     │
//! │  └─ root registry (trusted publisher, every root stays valid)│
//! │                                                              │
//! │  withdraw                                                    │
//! │  ├─ public inputs: root ‖ nullifier hash                     │
//! │  ├─ proof engine (external, bounded by timeout)              │
//! │  ├─ nullifier set (durable compare-and-swap)                 │
//! │  └─ ledger credit (recipient)                                │
//! │                                                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod accumulator;
pub mod authorizer;
pub mod config;
pub mod error;
pub mod ledger;
pub mod note;
pub mod nullifier;
pub mod pool;
pub mod proof;
pub mod registry;
pub mod storage;
pub mod types;
pub mod witness;

pub use accumulator::{Accumulator, MembershipWitness};
pub use authorizer::WithdrawalAuthorizer;
pub use config::PoolConfig;
pub use error::{PoolError, Result};
pub use ledger::{Ledger, LedgerError, MemoryLedger};
pub use note::DepositNote;
pub use nullifier::{NullifierSet, PaymentStatus, WithdrawalRecord};
pub use pool::{PoolStatus, ShieldedPool};
pub use proof::{
    ClaimedStatement, DigestVerifier, ProofBundle, ProofVerifier, ProtocolVersion, PublicInputs,
    VerificationKey,
};
pub use registry::{Publication, RegistryEntry, RootRegistry};
pub use storage::Storage;
pub use types::{Address, Amount, Commitment, FieldElement, LeafIndex, Nullifier, Root};
pub use witness::CircuitInput;

/// domain separator for proofs produced by the development engine
pub const DEV_PROOF_DOMAIN: &[u8] = b"laundeth.dev-proof.v1";
