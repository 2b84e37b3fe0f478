//! Bounded no-op dispatch for one recovery round
//!
//! One task per nonce on a `JoinSet`; the set is fully drained before the
//! caller looks at chain state again.

use crate::error::{SdkError, SdkResult};
use crate::tx::{Confirmation, ConfirmationWatcher, Submitter, TransferRequest};

use ethers::types::Address;
use std::ops::Range;
use tokio::task::JoinSet;
use tracing::{debug, error, warn, Instrument};

/// What happened to a single no-op
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoopOutcome {
    Confirmed,
    /// Accepted but not confirmed within the watch timeout
    TimedOut,
    /// Nonce already consumed by someone else
    Abandoned,
}

impl NoopOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoopOutcome::Confirmed => "confirmed",
            NoopOutcome::TimedOut => "timed_out",
            NoopOutcome::Abandoned => "abandoned",
        }
    }
}

/// Tally of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub dispatched: usize,
    pub confirmed: usize,
    pub timed_out: usize,
    pub abandoned: usize,
}

impl BatchOutcome {
    fn record(&mut self, outcome: NoopOutcome) {
        match outcome {
            NoopOutcome::Confirmed => self.confirmed += 1,
            NoopOutcome::TimedOut => self.timed_out += 1,
            NoopOutcome::Abandoned => self.abandoned += 1,
        }
        crate::metrics::record_noop(outcome.as_str());
    }
}

/// Burn every nonce in `nonces` with a zero-value transfer to `sink`
///
/// Returns the first fatal error, but only after every task has finished.
pub(crate) async fn dispatch_batch(
    submitter: &Submitter,
    watcher: &ConfirmationWatcher,
    sink: Address,
    nonces: Range<u64>,
) -> SdkResult<BatchOutcome> {
    let mut workers = JoinSet::new();

    for nonce in nonces {
        let submitter = submitter.clone();
        let watcher = watcher.clone();
        workers.spawn(
            async move { burn_nonce(&submitter, &watcher, sink, nonce).await }.in_current_span(),
        );
    }

    let mut outcome = BatchOutcome {
        dispatched: workers.len(),
        ..BatchOutcome::default()
    };
    let mut first_error = None;

    while let Some(joined) = workers.join_next().await {
        match joined.map_err(SdkError::from).and_then(|result| result) {
            Ok(noop) => outcome.record(noop),
            Err(e) => {
                error!("No-op dispatch failed: {}", e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(outcome),
    }
}

async fn burn_nonce(
    submitter: &Submitter,
    watcher: &ConfirmationWatcher,
    sink: Address,
    nonce: u64,
) -> SdkResult<NoopOutcome> {
    let tx = match submitter.submit(&TransferRequest::noop(sink, nonce), nonce).await {
        Ok(tx) => tx,
        Err(e) if e.is_retryable() => {
            debug!("Nonce {} already closed by another sender: {}", nonce, e);
            return Ok(NoopOutcome::Abandoned);
        }
        Err(e) => return Err(e),
    };

    match watcher.watch(tx.hash).await? {
        Confirmation::Confirmed(_) => Ok(NoopOutcome::Confirmed),
        Confirmation::TimedOut { hash } => {
            warn!(
                "No-op {:?} at nonce {} unconfirmed, assuming it was superseded",
                hash, nonce
            );
            Ok(NoopOutcome::TimedOut)
        }
    }
}
