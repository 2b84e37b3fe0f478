//! Reconciles the stored nonce counter with the chain-observed transaction count

use super::batch::{dispatch_batch, BatchOutcome};
use crate::api::LedgerApi;
use crate::error::SdkResult;
use crate::tx::{ConfirmationWatcher, NonceAllocator, Submitter};

use ethers::types::Address;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Recovery tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Maximum no-ops in flight at once
    pub batch_size: usize,
    /// Per no-op confirmation timeout
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Pause after each batch before re-reading chain state
    pub settle_secs: u64,
    /// Recipient of the zero-value no-ops; the wallet's own address if unset
    pub sink_address: Option<Address>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            confirmation_timeout_secs: 10,
            poll_interval_ms: 200,
            settle_secs: 5,
            sink_address: None,
        }
    }
}

impl RecoveryConfig {
    pub fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_time(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

/// Relationship between the stored counter and the transaction count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceDrift {
    InSync { nonce: u64 },
    /// Counter fell behind the chain; fixed with an overwrite
    Behind { stored: u64, transaction_count: u64 },
    /// Nonces `transaction_count..stored` were reserved but never mined
    Gap { stored: u64, transaction_count: u64 },
}

impl NonceDrift {
    pub fn observe(transaction_count: u64, stored: u64) -> Self {
        use std::cmp::Ordering;

        match stored.cmp(&transaction_count) {
            Ordering::Equal => NonceDrift::InSync { nonce: stored },
            Ordering::Less => NonceDrift::Behind {
                stored,
                transaction_count,
            },
            Ordering::Greater => NonceDrift::Gap {
                stored,
                transaction_count,
            },
        }
    }

    /// Number of nonces that still need a no-op
    pub fn gap(&self) -> u64 {
        match self {
            NonceDrift::Gap {
                stored,
                transaction_count,
            } => stored - transaction_count,
            _ => 0,
        }
    }

    pub fn is_in_sync(&self) -> bool {
        matches!(self, NonceDrift::InSync { .. })
    }
}

/// Summary of one recovery run
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    pub run_id: Uuid,
    pub initial: NonceDrift,
    /// Value written when the counter was behind
    pub overwritten_to: Option<u64>,
    pub batches: usize,
    pub dispatched: usize,
    pub confirmed: usize,
    pub timed_out: usize,
    pub abandoned: usize,
    pub final_nonce: u64,
    pub elapsed: Duration,
}

impl RecoveryReport {
    fn new(run_id: Uuid, initial: NonceDrift) -> Self {
        Self {
            run_id,
            initial,
            overwritten_to: None,
            batches: 0,
            dispatched: 0,
            confirmed: 0,
            timed_out: 0,
            abandoned: 0,
            final_nonce: 0,
            elapsed: Duration::ZERO,
        }
    }

    fn absorb(&mut self, batch: &BatchOutcome) {
        self.batches += 1;
        self.dispatched += batch.dispatched;
        self.confirmed += batch.confirmed;
        self.timed_out += batch.timed_out;
        self.abandoned += batch.abandoned;
    }
}

/// Skipped-nonce recovery for one brand address
pub struct RecoveryEngine {
    allocator: NonceAllocator,
    submitter: Submitter,
    watcher: ConfirmationWatcher,
    config: RecoveryConfig,
}

impl RecoveryEngine {
    pub fn new(
        allocator: NonceAllocator,
        submitter: Submitter,
        api: Arc<dyn LedgerApi>,
        config: RecoveryConfig,
    ) -> Self {
        let watcher = ConfirmationWatcher::new(
            api,
            config.poll_interval(),
            config.confirmation_timeout(),
        );

        Self {
            allocator,
            submitter,
            watcher,
            config,
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    fn sink(&self) -> Address {
        self.config
            .sink_address
            .unwrap_or_else(|| self.allocator.address())
    }

    /// Read both counters without changing anything
    pub async fn inspect(&self) -> SdkResult<NonceDrift> {
        let transaction_count = self.allocator.transaction_count().await?;
        let stored = self.allocator.read().await?;
        let drift = NonceDrift::observe(transaction_count, stored);

        crate::metrics::set_nonce_gap(self.allocator.address(), drift.gap());
        debug!("Nonce drift for {:?}: {:?}", self.allocator.address(), drift);
        Ok(drift)
    }

    /// Run until the stored counter matches the transaction count
    ///
    /// State is re-read before every batch, so a failed run can simply be
    /// started again. Counters are left wherever they got to on error.
    pub async fn run(&self) -> SdkResult<RecoveryReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "recovery",
            run_id = %run_id,
            address = ?self.allocator.address(),
        );

        let result = self.reconcile(run_id).instrument(span).await;
        crate::metrics::record_recovery_run(if result.is_ok() { "converged" } else { "failed" });
        result
    }

    async fn reconcile(&self, run_id: Uuid) -> SdkResult<RecoveryReport> {
        let started = Instant::now();
        let sink = self.sink();
        let batch_size = self.config.batch_size() as u64;

        let initial = self.inspect().await?;
        let mut report = RecoveryReport::new(run_id, initial);
        info!("Starting skipped nonce recovery: {:?}", initial);

        let mut drift = initial;
        loop {
            match drift {
                NonceDrift::InSync { nonce } => {
                    report.final_nonce = nonce;
                    break;
                }
                NonceDrift::Behind {
                    stored,
                    transaction_count,
                } => {
                    warn!(
                        "Stored nonce {} is behind transaction count {}, overwriting",
                        stored, transaction_count
                    );
                    let written = self.allocator.overwrite(transaction_count).await?;
                    report.overwritten_to = Some(written);
                    report.final_nonce = written;
                    break;
                }
                NonceDrift::Gap {
                    stored,
                    transaction_count,
                } => {
                    let end = stored.min(transaction_count + batch_size);
                    info!(
                        "Burning nonces {}..{} ({} still missing)",
                        transaction_count,
                        end,
                        stored - transaction_count
                    );

                    let batch =
                        dispatch_batch(&self.submitter, &self.watcher, sink, transaction_count..end)
                            .await?;
                    debug!("Batch finished: {:?}", batch);
                    report.absorb(&batch);

                    tokio::time::sleep(self.config.settle_time()).await;
                    drift = self.inspect().await?;
                }
            }
        }

        report.elapsed = started.elapsed();
        info!(
            "Recovery finished at nonce {} after {} batches ({} no-ops, {} timed out, {} abandoned)",
            report.final_nonce, report.batches, report.dispatched, report.timed_out, report.abandoned
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ready_wallet, MemoryLedger};
    use crate::tx::TransferStrategy;

    fn engine(ledger: &Arc<MemoryLedger>) -> RecoveryEngine {
        ready_wallet(ledger.clone(), TransferStrategy::Brand)
            .recovery(RecoveryConfig::default())
            .unwrap()
    }

    #[test]
    fn test_drift_classification() {
        assert_eq!(NonceDrift::observe(5, 5), NonceDrift::InSync { nonce: 5 });
        assert_eq!(NonceDrift::observe(10, 3).gap(), 0);
        assert_eq!(NonceDrift::observe(3, 10).gap(), 7);
        assert!(matches!(NonceDrift::observe(10, 3), NonceDrift::Behind { .. }));
    }

    #[test]
    fn test_batch_size_is_at_least_one() {
        let config = RecoveryConfig {
            batch_size: 0,
            ..RecoveryConfig::default()
        };
        assert_eq!(config.batch_size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_sync_is_a_no_op_and_idempotent() {
        let ledger = Arc::new(MemoryLedger::new(5, 5));
        let engine = engine(&ledger);

        for _ in 0..2 {
            let report = engine.run().await.unwrap();
            assert_eq!(report.dispatched, 0);
            assert_eq!(report.final_nonce, 5);
        }
        assert!(ledger.submitted_nonces().is_empty());
        assert!(ledger.overwrites().is_empty());
        assert_eq!(ledger.stored_nonce(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_is_closed_with_no_ops() {
        let ledger = Arc::new(MemoryLedger::new(3, 10));
        let report = engine(&ledger).run().await.unwrap();

        assert_eq!(report.dispatched, 7);
        assert_eq!(report.confirmed, 7);
        assert_eq!(report.batches, 1);
        assert_eq!(ledger.submitted_nonces().len(), 7);
        assert_eq!(ledger.transaction_count(), 10);
        assert_eq!(ledger.stored_nonce(), 10);
        assert!(ledger.overwrites().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lagging_counter_is_overwritten() {
        let ledger = Arc::new(MemoryLedger::new(10, 3));
        let report = tokio_test::assert_ok!(engine(&ledger).run().await);

        assert_eq!(report.overwritten_to, Some(10));
        assert_eq!(report.dispatched, 0);
        assert_eq!(ledger.overwrites(), vec![10]);
        assert!(ledger.submitted_nonces().is_empty());
        assert_eq!(ledger.transaction_count(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_no_op_does_not_block_recovery() {
        let ledger = Arc::new(MemoryLedger::new(3, 6));
        ledger.never_index(4);

        let report = engine(&ledger).run().await.unwrap();

        assert_eq!(report.timed_out, 1);
        assert_eq!(report.confirmed, 2);
        assert_eq!(report.final_nonce, 6);
        assert!(report.elapsed >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nonce_taken_by_competitor_is_abandoned() {
        let ledger = Arc::new(MemoryLedger::new(3, 10));
        ledger.occupy(5);

        let report = engine(&ledger).run().await.unwrap();

        assert_eq!(report.abandoned, 1);
        assert_eq!(report.confirmed, 6);
        assert!(!ledger.submitted_nonces().contains(&5));
        assert_eq!(ledger.transaction_count(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_gap_is_split_into_bounded_batches() {
        let ledger = Arc::new(MemoryLedger::new(0, 60));
        let report = engine(&ledger).run().await.unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.dispatched, 60);
        assert_eq!(ledger.submission_rounds(), vec![25, 25, 10]);
        assert!(ledger.submission_rounds().iter().all(|round| *round <= DEFAULT_BATCH_SIZE));
        assert_eq!(ledger.transaction_count(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_poll_interval_does_not_break_workers() {
        let ledger = Arc::new(MemoryLedger::new(3, 5));
        let engine = ready_wallet(ledger.clone(), TransferStrategy::Brand)
            .recovery(RecoveryConfig {
                poll_interval_ms: 0,
                ..RecoveryConfig::default()
            })
            .unwrap();

        let report = engine.run().await.unwrap();
        assert_eq!(report.confirmed, 2);
        assert_eq!(ledger.transaction_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inspect_does_not_mutate() {
        let ledger = Arc::new(MemoryLedger::new(2, 9));
        let drift = engine(&ledger).inspect().await.unwrap();

        assert_eq!(drift.gap(), 7);
        assert_eq!(ledger.stored_nonce(), 9);
        assert!(ledger.submitted_nonces().is_empty());
    }
}
