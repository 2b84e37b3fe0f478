//! Confirmation polling for submitted transactions
//!
//! A freshly submitted transaction is usually not indexed yet, so `NotFound`
//! is expected for a while and simply polled through. Every watch is bounded
//! by a wall-clock timeout.

use crate::api::{LedgerApi, Transaction};
use crate::error::SdkResult;

use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of watching one transaction
#[derive(Debug, Clone)]
pub enum Confirmation {
    Confirmed(Transaction),
    /// Gave up waiting; the transaction may still land or may have been superseded
    TimedOut { hash: H256 },
}

impl Confirmation {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Confirmation::Confirmed(_))
    }
}

/// Polls the ledger until a transaction reaches the required confirmations
#[derive(Clone)]
pub struct ConfirmationWatcher {
    api: Arc<dyn LedgerApi>,
    poll_interval: Duration,
    timeout: Duration,
    required_confirms: u64,
}

impl ConfirmationWatcher {
    /// A zero `poll_interval` is raised to one millisecond
    pub fn new(api: Arc<dyn LedgerApi>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            api,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            timeout,
            required_confirms: 1,
        }
    }

    pub fn with_required_confirms(mut self, confirms: u64) -> Self {
        self.required_confirms = confirms.max(1);
        self
    }

    /// Wait for `hash` to be confirmed, or time out
    ///
    /// Errors other than `NotFound` end the watch and are returned.
    pub async fn watch(&self, hash: H256) -> SdkResult<Confirmation> {
        let result = timeout(self.timeout, async {
            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                match self.api.get_transaction(hash).await {
                    Ok(tx) if tx.is_confirmed(self.required_confirms) => return Ok(tx),
                    Ok(tx) => {
                        debug!(
                            "Transaction {:?} has {} / {} confirmations",
                            hash,
                            tx.confirmations(),
                            self.required_confirms
                        );
                    }
                    Err(e) if e.is_not_found() => {
                        debug!("Transaction {:?} not indexed yet", hash);
                    }
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match result {
            Ok(Ok(tx)) => Ok(Confirmation::Confirmed(tx)),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                debug!(
                    "Stopped watching {:?} after {:?} without confirmation",
                    hash, self.timeout
                );
                Ok(Confirmation::TimedOut { hash })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::TransactionState;
    use crate::api::MockLedgerApi;
    use crate::error::SdkError;
    use crate::testing::sample_transaction;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_polls_through_not_found() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut api = MockLedgerApi::new();
        api.expect_get_transaction().returning(move |hash| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(SdkError::not_found("not indexed")),
                2 => Ok(sample_transaction(hash, 4, 0, TransactionState::Pending)),
                _ => Ok(sample_transaction(hash, 4, 1, TransactionState::Processed)),
            }
        });

        let watcher = ConfirmationWatcher::new(
            Arc::new(api),
            DEFAULT_POLL_INTERVAL,
            DEFAULT_CONFIRMATION_TIMEOUT,
        );
        let outcome = watcher.watch(H256::repeat_byte(1)).await.unwrap();

        match outcome {
            Confirmation::Confirmed(tx) => assert_eq!(tx.nonce, 4),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_instead_of_hanging() {
        let mut api = MockLedgerApi::new();
        api.expect_get_transaction()
            .returning(|_| Err(SdkError::not_found("not indexed")));

        let watcher = ConfirmationWatcher::new(
            Arc::new(api),
            DEFAULT_POLL_INTERVAL,
            DEFAULT_CONFIRMATION_TIMEOUT,
        );
        let started = tokio::time::Instant::now();
        let outcome = watcher.watch(H256::repeat_byte(2)).await.unwrap();

        assert!(!outcome.is_confirmed());
        assert!(started.elapsed() >= DEFAULT_CONFIRMATION_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_poll_interval_still_polls() {
        let mut api = MockLedgerApi::new();
        api.expect_get_transaction()
            .returning(|hash| Ok(sample_transaction(hash, 1, 1, TransactionState::Processed)));

        let watcher = ConfirmationWatcher::new(Arc::new(api), Duration::ZERO, DEFAULT_CONFIRMATION_TIMEOUT);
        let outcome = watcher.watch(H256::repeat_byte(3)).await.unwrap();
        assert!(outcome.is_confirmed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_end_the_watch() {
        let mut api = MockLedgerApi::new();
        api.expect_get_transaction().times(1).returning(|_| {
            Err(SdkError::Authorization {
                message: "revoked".to_string(),
                status: Some(403),
            })
        });

        let watcher = ConfirmationWatcher::new(
            Arc::new(api),
            DEFAULT_POLL_INTERVAL,
            DEFAULT_CONFIRMATION_TIMEOUT,
        );
        let err = watcher.watch(H256::zero()).await.unwrap_err();
        assert!(matches!(err, SdkError::Authorization { .. }));
    }
}
