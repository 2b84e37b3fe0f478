//! Skipped-nonce recovery
//!
//! After a crash or partial failure the stored nonce counter can run ahead of
//! the address's transaction count, leaving nonces that will never be mined.
//! The engine:
//! 1. Compares the stored counter with the chain-observed transaction count
//! 2. Pulls a lagging counter forward with a direct overwrite
//! 3. Burns unused nonces with zero-value transfers, in bounded batches
//! 4. Re-reads live state after every batch until the two agree

pub mod batch;
pub mod engine;

pub use batch::{BatchOutcome, NoopOutcome};
pub use engine::{NonceDrift, RecoveryConfig, RecoveryEngine, RecoveryReport};
