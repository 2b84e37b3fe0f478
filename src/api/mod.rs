//! Ledger API collaborator
//!
//! Everything authoritative (transaction counts, the stored nonce counter,
//! submitted transactions) lives behind this trait. The sender and the
//! recovery engine only ever talk to an `Arc<dyn LedgerApi>`.

pub mod client;
pub mod types;

pub use client::{ApiMode, HttpLedgerApi};
pub use types::{
    AddressInfo, Block, Token, Tokens, Transaction, TransactionQuery, TransactionState,
};

use crate::error::SdkResult;
use crate::tx::SignedPayload;

use async_trait::async_trait;
use ethers::types::{Address, H256};

/// Remote operations the sender depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerApi: Send + Sync {
    /// Current on-chain view of an address, including its transaction count
    async fn get_address(&self, address: Address) -> SdkResult<AddressInfo>;

    /// Read the server-held nonce counter without changing it
    async fn get_stored_nonce(&self, address: Address) -> SdkResult<u64>;

    /// Force the server-held nonce counter to `nonce`
    async fn set_stored_nonce(&self, address: Address, nonce: u64) -> SdkResult<u64>;

    /// Reserve the next nonce; returns the reserved value
    async fn increment_stored_nonce(&self, address: Address) -> SdkResult<u64>;

    /// Hand signed transaction bytes to the ledger
    async fn submit_signed_transaction(&self, payload: &SignedPayload) -> SdkResult<Transaction>;

    async fn get_transaction(&self, hash: H256) -> SdkResult<Transaction>;

    /// Paged transaction listing, newest first
    async fn get_transactions(&self, query: &TransactionQuery) -> SdkResult<Vec<Transaction>>;

    async fn get_last_block(&self) -> SdkResult<Block>;

    async fn get_tokens(&self, wallet: Option<Address>, include_public: bool) -> SdkResult<Tokens>;

    /// Loyalty token deployed at `contract`
    async fn get_token(&self, contract: Address) -> SdkResult<Token>;

    /// Whether authenticated endpoints can be called
    fn has_credentials(&self) -> bool;
}
