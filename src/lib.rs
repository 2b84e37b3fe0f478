//! Nonce-safe transaction submission for brand addresses
//!
//! A brand address shares one server-held nonce counter between every process
//! that sends from it. This crate allocates nonces against that counter,
//! retries sends that lose a nonce race, and repairs the counter when it drifts
//! away from the address's on-chain transaction count.

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod recovery;
pub mod tx;

#[cfg(test)]
mod testing;

pub use api::{ApiMode, HttpLedgerApi, LedgerApi};
pub use error::{SdkError, SdkResult};
pub use recovery::{NonceDrift, RecoveryConfig, RecoveryEngine, RecoveryReport};
pub use tx::{TransactionKind, TransferRequest, TransferStrategy, Wallet};
