//! Off-chain MACI coordinator core.
//!
//! This crate mirrors an on-chain quadratic voting system in memory:
//! sign-ups and encrypted vote messages go in, deterministic state
//! transitions and zk-SNARK witness inputs come out. It never talks to a
//! chain, never persists anything, and never produces proofs; those live
//! with external collaborators that consume the contracts defined here.
//!
//! The engine is single-threaded and synchronous. One [`state::MaciState`]
//! instance per coordinator process, `Clone` for deep snapshots, and
//! recomputed Merkle trees instead of stored ones.

/// Commands and their encrypted on-chain message form.
pub mod command;
/// Immutable coordinator configuration.
pub mod config;
/// State leaves, the hashed per-slot records of the state tree.
pub mod leaf;
/// The authoritative state engine.
pub mod state;
/// Circuit-input builders, the prover wire contract.
pub mod witness;

pub use command::{Command, Message};
pub use config::CoordinatorConfig;
pub use leaf::StateLeaf;
pub use state::MaciState;
