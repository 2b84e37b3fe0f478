//! Transaction submission module with nonce allocation and conflict retries

mod builder;
mod confirm;
mod nonce;
mod retry;
mod sender;
mod signer;

pub use builder::{TransactionBuilder, TransactionKind, TransferRequest, UnsignedTransaction, GAS_LIMIT};
pub use confirm::{Confirmation, ConfirmationWatcher, DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_POLL_INTERVAL};
pub use nonce::{NonceAllocator, TransferStrategy};
pub use retry::{BackoffPolicy, Jitter, RetryConfig, RetryController};
pub use sender::{Submitter, Wallet};
pub use signer::{BrandSigner, SignedPayload};
