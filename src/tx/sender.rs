//! Brand wallet: nonce-safe transaction submission
//!
//! Send path: allocate a nonce, build, sign locally, submit. Under the brand
//! strategy the whole path is wrapped in the retry controller so that a nonce
//! conflict leads to a fresh allocation on the next attempt.

use super::builder::{TransactionBuilder, TransferRequest};
use super::confirm::{Confirmation, ConfirmationWatcher};
use super::nonce::{NonceAllocator, TransferStrategy};
use super::retry::{RetryConfig, RetryController};
use super::signer::BrandSigner;
use crate::api::{LedgerApi, Transaction};
use crate::error::{SdkError, SdkResult};
use crate::recovery::{RecoveryConfig, RecoveryEngine};

use ethers::types::{Address, H256};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Build, sign and submit at a given nonce
///
/// Shared by the send path and the recovery workers; cheap to clone.
#[derive(Clone)]
pub struct Submitter {
    api: Arc<dyn LedgerApi>,
    signer: Arc<BrandSigner>,
    builder: TransactionBuilder,
}

impl Submitter {
    pub fn new(api: Arc<dyn LedgerApi>, signer: Arc<BrandSigner>, builder: TransactionBuilder) -> Self {
        Self {
            api,
            signer,
            builder,
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn builder(&self) -> &TransactionBuilder {
        &self.builder
    }

    pub async fn submit(&self, request: &TransferRequest, nonce: u64) -> SdkResult<Transaction> {
        info!(
            "Executing {} to {:?}, value {}, nonce {} on chain {}",
            request.kind,
            request.to,
            request.value,
            nonce,
            self.builder.chain_id()
        );

        let unsigned = self.builder.build(request, nonce);
        let payload = self.signer.sign(&unsigned)?;

        match self.api.submit_signed_transaction(&payload).await {
            Ok(tx) => {
                debug!("Submitted {:?} at nonce {}", payload.hash(), nonce);
                crate::metrics::record_tx_submitted(request.kind);
                Ok(tx)
            }
            Err(e) if e.is_retryable() => {
                warn!("Submission conflict at nonce {}: {}", nonce, e);
                crate::metrics::record_nonce_conflict("submit");
                Err(e)
            }
            Err(e) => {
                crate::metrics::record_tx_failed(request.kind);
                Err(e)
            }
        }
    }
}

/// Sends token transfers from the brand address
pub struct Wallet {
    api: Arc<dyn LedgerApi>,
    signer: Arc<BrandSigner>,
    token_symbol: String,
    allocator: NonceAllocator,
    retry: RetryController,
    submitter: OnceLock<Submitter>,
}

impl Wallet {
    /// Create a wallet; the key is validated here, once
    pub fn new(
        private_key: &str,
        token_symbol: impl Into<String>,
        api: Arc<dyn LedgerApi>,
        strategy: TransferStrategy,
        retry: RetryConfig,
    ) -> SdkResult<Self> {
        if strategy == TransferStrategy::Brand && !api.has_credentials() {
            return Err(SdkError::Config(
                "API instance requires an api_key if employing the brand transfer strategy"
                    .to_string(),
            ));
        }

        let signer = Arc::new(BrandSigner::from_private_key(private_key)?);
        let allocator = NonceAllocator::new(api.clone(), signer.address(), strategy);

        Ok(Self {
            api,
            signer,
            token_symbol: token_symbol.into(),
            allocator,
            retry: RetryController::new(retry),
            submitter: OnceLock::new(),
        })
    }

    /// Resolve the token contract and chain id; required before sending
    pub async fn setup(&self) -> SdkResult<()> {
        if self.submitter.get().is_some() {
            return Ok(());
        }

        info!("Wallet configured to use token {}", self.token_symbol);
        let tokens = self.api.get_tokens(Some(self.address()), false).await?;
        let token = tokens
            .private_by_symbol(&self.token_symbol)
            .ok_or_else(|| {
                SdkError::Config(format!(
                    "Token with symbol {} does not exist",
                    self.token_symbol
                ))
            })?;

        info!("Requesting blockchain network info");
        let block = self.api.get_last_block().await?;

        info!(
            "Using contract {:?} on chain {}",
            token.contract_address, block.chain_id
        );
        self.install(TransactionBuilder::new(token.contract_address, block.chain_id))
    }

    /// Use an already known contract and chain id instead of looking them up
    ///
    /// Installing the same builder twice is fine; a different one is rejected.
    pub(crate) fn install(&self, builder: TransactionBuilder) -> SdkResult<()> {
        let installed = self
            .submitter
            .get_or_init(|| Submitter::new(self.api.clone(), self.signer.clone(), builder.clone()));

        if installed.builder() != &builder {
            return Err(SdkError::Config(format!(
                "Wallet already set up for contract {:?} on chain {}",
                installed.builder().contract_address(),
                installed.builder().chain_id()
            )));
        }
        Ok(())
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn checksum_address(&self) -> String {
        self.signer.checksum_address()
    }

    pub fn strategy(&self) -> TransferStrategy {
        self.allocator.strategy()
    }

    pub fn allocator(&self) -> &NonceAllocator {
        &self.allocator
    }

    pub fn api(&self) -> Arc<dyn LedgerApi> {
        self.api.clone()
    }

    fn submitter(&self) -> SdkResult<&Submitter> {
        self.submitter.get().ok_or_else(|| {
            SdkError::Config(
                "Call setup() first in order to be able to send transactions".to_string(),
            )
        })
    }

    /// Send one transfer
    ///
    /// With an explicit nonce the request is submitted once, as is. Otherwise
    /// a nonce is allocated per attempt and conflicts are retried.
    pub async fn send_transaction(&self, request: TransferRequest) -> SdkResult<Transaction> {
        let submitter = self.submitter()?;
        let started = Instant::now();

        let result = match request.nonce {
            Some(nonce) => submitter.submit(&request, nonce).await,
            None => {
                let allocator = &self.allocator;
                let request = &request;
                self.retry
                    .run(move || async move {
                        let nonce = allocator.next().await?;
                        submitter.submit(request, nonce).await
                    })
                    .await
            }
        };

        if result.is_ok() {
            crate::metrics::record_send_latency(request.kind, started.elapsed().as_secs_f64());
        }
        result
    }

    /// Poll until `hash` has at least one confirmation or `timeout` passes
    pub async fn wait_for_confirmation(
        &self,
        hash: H256,
        poll_interval: Duration,
        timeout: Duration,
    ) -> SdkResult<Confirmation> {
        ConfirmationWatcher::new(self.api.clone(), poll_interval, timeout)
            .watch(hash)
            .await
    }

    /// Recovery engine bound to this wallet's address and signer
    ///
    /// Needs the stored nonce counter, so only the brand strategy supports it.
    pub fn recovery(&self, config: RecoveryConfig) -> SdkResult<RecoveryEngine> {
        if self.strategy() != TransferStrategy::Brand {
            return Err(SdkError::UnsupportedOperation(
                "skipped nonce recovery requires the brand transfer strategy".to_string(),
            ));
        }

        let submitter = self.submitter()?.clone();
        Ok(RecoveryEngine::new(
            self.allocator.clone(),
            submitter,
            self.api.clone(),
            config,
        ))
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.checksum_address())
            .field("token_symbol", &self.token_symbol)
            .field("strategy", &self.strategy())
            .field("ready", &self.submitter.get().is_some())
            .finish()
    }
}
