//! Nonce allocation for reliable transaction submission
//!
//! Handles:
//! - Reserving nonces against the server-held counter (brand strategy)
//! - Deriving nonces from the public transaction count (user strategy)
//! - Reading and overwriting the stored counter for recovery
//!
//! Nothing is cached locally. The counter is shared with every other process
//! sending from the same address, so each call goes to the API.

use crate::api::LedgerApi;
use crate::error::{SdkError, SdkResult};

use ethers::types::Address;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// How nonces are obtained for an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStrategy {
    /// Authenticated stored-nonce counter; safe for concurrent senders
    Brand,
    /// Public transaction count; conflicts surface at submission
    #[default]
    User,
}

impl fmt::Display for TransferStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStrategy::Brand => f.write_str("brand"),
            TransferStrategy::User => f.write_str("user"),
        }
    }
}

/// Hands out nonces for one address
#[derive(Clone)]
pub struct NonceAllocator {
    api: Arc<dyn LedgerApi>,
    address: Address,
    strategy: TransferStrategy,
}

impl NonceAllocator {
    pub fn new(api: Arc<dyn LedgerApi>, address: Address, strategy: TransferStrategy) -> Self {
        Self {
            api,
            address,
            strategy,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn strategy(&self) -> TransferStrategy {
        self.strategy
    }

    /// Reserve the next nonce
    ///
    /// Under the brand strategy the server guarantees no two callers see the
    /// same value; a caller that loses a race gets `Conflict`.
    pub async fn next(&self) -> SdkResult<u64> {
        let nonce = match self.strategy {
            TransferStrategy::Brand => {
                self.api
                    .increment_stored_nonce(self.address)
                    .await
                    .map_err(|e| {
                        if e.is_retryable() {
                            warn!("Nonce allocation conflict for {:?}: {}", self.address, e);
                            crate::metrics::record_nonce_conflict("allocate");
                        }
                        e
                    })?
            }
            TransferStrategy::User => self.transaction_count().await?,
        };

        debug!(
            "Allocated nonce {} for {:?} ({} strategy)",
            nonce, self.address, self.strategy
        );
        Ok(nonce)
    }

    /// Current stored counter, unchanged
    pub async fn read(&self) -> SdkResult<u64> {
        self.require_stored_counter("read the stored nonce")?;
        self.api.get_stored_nonce(self.address).await
    }

    /// Force the stored counter to `value`
    ///
    /// Can open or close gaps; only the recovery engine calls this.
    pub async fn overwrite(&self, value: u64) -> SdkResult<u64> {
        self.require_stored_counter("overwrite the stored nonce")?;
        let stored = self.api.set_stored_nonce(self.address, value).await?;
        warn!("Stored nonce for {:?} overwritten to {}", self.address, stored);
        Ok(stored)
    }

    /// Chain-observed transaction count
    pub async fn transaction_count(&self) -> SdkResult<u64> {
        Ok(self.api.get_address(self.address).await?.transaction_count)
    }

    fn require_stored_counter(&self, operation: &str) -> SdkResult<()> {
        match self.strategy {
            TransferStrategy::Brand => Ok(()),
            TransferStrategy::User => Err(SdkError::UnsupportedOperation(format!(
                "cannot {} with the user transfer strategy",
                operation
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockLedgerApi;
    use crate::testing::MemoryLedger;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_concurrent_next_never_repeats() {
        let ledger = Arc::new(MemoryLedger::new(0, 0));
        let allocator = NonceAllocator::new(ledger.clone(), ledger.address(), TransferStrategy::Brand);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let allocator = allocator.clone();
                tokio::spawn(async move { allocator.next().await.unwrap() })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()), "nonce handed out twice");
        }
        assert_eq!(seen.len(), 32);
        assert_eq!(allocator.read().await.unwrap(), 32);
    }

    #[tokio::test]
    async fn test_user_strategy_uses_transaction_count() {
        let ledger = Arc::new(MemoryLedger::new(9, 4));
        let allocator = NonceAllocator::new(ledger.clone(), ledger.address(), TransferStrategy::User);

        assert_eq!(allocator.next().await.unwrap(), 9);
        assert!(matches!(
            allocator.read().await,
            Err(SdkError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            allocator.overwrite(9).await,
            Err(SdkError::UnsupportedOperation(_))
        ));
        // the stored counter is untouched
        assert_eq!(ledger.stored_nonce(), 4);
    }

    #[tokio::test]
    async fn test_fatal_errors_pass_through() {
        let mut api = MockLedgerApi::new();
        api.expect_increment_stored_nonce().times(1).returning(|_| {
            Err(SdkError::Authorization {
                message: "invalid api key".to_string(),
                status: Some(403),
            })
        });

        let allocator = NonceAllocator::new(Arc::new(api), Address::zero(), TransferStrategy::Brand);
        let err = allocator.next().await.unwrap_err();
        assert_eq!(err.http_status(), Some(403));
    }

    #[tokio::test]
    async fn test_overwrite_returns_server_value() {
        let mut api = MockLedgerApi::new();
        api.expect_set_stored_nonce()
            .withf(|_, nonce| *nonce == 10)
            .times(1)
            .returning(|_, nonce| Ok(nonce));

        let allocator = NonceAllocator::new(Arc::new(api), Address::zero(), TransferStrategy::Brand);
        assert_eq!(allocator.overwrite(10).await.unwrap(), 10);
    }
}
