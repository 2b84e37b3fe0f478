//! In-memory ledger for tests
//!
//! Models the parts of the API the sender relies on: an exclusive stored
//! nonce counter, a transaction count that advances as contiguous nonces are
//! accepted, and conflicts for nonces that are already used.

use crate::api::types::{
    AddressInfo, Balances, Block, Token, Tokens, Transaction, TransactionQuery, TransactionState,
};
use crate::api::LedgerApi;
use crate::error::{SdkError, SdkResult};
use crate::tx::{RetryConfig, SignedPayload, TransactionBuilder, TransferStrategy, Wallet};

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

// Anvil's first account
pub const TEST_PRIVATE_KEY: &str =
    "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

const CHAIN_ID: u64 = 1729;

#[derive(Default)]
struct LedgerState {
    transaction_count: u64,
    stored_nonce: u64,
    used: BTreeSet<u64>,
    by_hash: HashMap<H256, u64>,
    allocated: Vec<u64>,
    submitted: Vec<u64>,
    overwrites: Vec<u64>,
    failing_increments: u32,
    unindexed: HashSet<u64>,
    current_round: usize,
    rounds: Vec<usize>,
}

impl LedgerState {
    fn mine(&mut self) {
        while self.used.contains(&self.transaction_count) {
            self.transaction_count += 1;
        }
    }
}

pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    address: Address,
    credentials: bool,
}

impl MemoryLedger {
    /// Ledger for the test key's address with the given counters
    pub fn new(transaction_count: u64, stored_nonce: u64) -> Self {
        let address = crate::tx::BrandSigner::from_private_key(TEST_PRIVATE_KEY)
            .expect("valid test key")
            .address();

        Self {
            state: Mutex::new(LedgerState {
                transaction_count,
                stored_nonce,
                ..LedgerState::default()
            }),
            address,
            credentials: true,
        }
    }

    pub fn without_credentials(mut self) -> Self {
        self.credentials = false;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().expect("ledger state poisoned")
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        CHAIN_ID
    }

    pub fn token_contract(&self) -> Address {
        Address::repeat_byte(0x42)
    }

    fn token(&self) -> Token {
        Token {
            contract_address: self.token_contract(),
            symbol: "QBX".to_string(),
            name: "Test Loyalty Token".to_string(),
            decimals: 18,
            description: None,
            rate: None,
            total_supply: U256::exp10(24),
        }
    }

    pub fn transaction_count(&self) -> u64 {
        self.state().transaction_count
    }

    pub fn stored_nonce(&self) -> u64 {
        self.state().stored_nonce
    }

    pub fn allocated_nonces(&self) -> Vec<u64> {
        self.state().allocated.clone()
    }

    pub fn submitted_nonces(&self) -> Vec<u64> {
        self.state().submitted.clone()
    }

    pub fn overwrites(&self) -> Vec<u64> {
        self.state().overwrites.clone()
    }

    /// Submissions between consecutive transaction count reads
    pub fn submission_rounds(&self) -> Vec<usize> {
        let state = self.state();
        let mut rounds = state.rounds.clone();
        if state.current_round > 0 {
            rounds.push(state.current_round);
        }
        rounds
    }

    /// The next `count` increments consume a value but report a conflict
    pub fn fail_next_increments(&self, count: u32) {
        self.state().failing_increments = count;
    }

    /// Another sender already used `nonce`
    pub fn occupy(&self, nonce: u64) {
        let mut state = self.state();
        state.used.insert(nonce);
        state.mine();
    }

    /// Transactions at `nonce` are accepted but never show up when polled
    pub fn never_index(&self, nonce: u64) {
        self.state().unindexed.insert(nonce);
    }
}

#[async_trait]
impl LedgerApi for MemoryLedger {
    async fn get_address(&self, _address: Address) -> SdkResult<AddressInfo> {
        let mut state = self.state();
        if state.current_round > 0 {
            let round = std::mem::take(&mut state.current_round);
            state.rounds.push(round);
        }
        Ok(address_info(state.transaction_count))
    }

    async fn get_stored_nonce(&self, _address: Address) -> SdkResult<u64> {
        Ok(self.state().stored_nonce)
    }

    async fn set_stored_nonce(&self, _address: Address, nonce: u64) -> SdkResult<u64> {
        let mut state = self.state();
        state.stored_nonce = nonce;
        state.overwrites.push(nonce);
        Ok(nonce)
    }

    async fn increment_stored_nonce(&self, _address: Address) -> SdkResult<u64> {
        let mut state = self.state();
        let nonce = state.stored_nonce;
        state.stored_nonce += 1;
        state.allocated.push(nonce);

        if state.failing_increments > 0 {
            state.failing_increments -= 1;
            return Err(SdkError::Conflict {
                message: format!("nonce {} already consumed", nonce),
                status: Some(409),
            });
        }
        Ok(nonce)
    }

    async fn submit_signed_transaction(&self, payload: &SignedPayload) -> SdkResult<Transaction> {
        let mut state = self.state();
        let nonce = payload.nonce();

        if nonce < state.transaction_count || state.used.contains(&nonce) {
            return Err(SdkError::Conflict {
                message: format!("nonce {} already used", nonce),
                status: Some(409),
            });
        }

        state.used.insert(nonce);
        state.submitted.push(nonce);
        state.by_hash.insert(payload.hash(), nonce);
        state.current_round += 1;
        state.mine();

        Ok(sample_transaction(payload.hash(), nonce, 0, TransactionState::Pending))
    }

    async fn get_transaction(&self, hash: H256) -> SdkResult<Transaction> {
        let state = self.state();
        match state.by_hash.get(&hash).copied() {
            Some(nonce) if !state.unindexed.contains(&nonce) => Ok(sample_transaction(
                hash,
                nonce,
                1,
                TransactionState::Processed,
            )),
            _ => Err(SdkError::NotFound {
                message: format!("transaction {:?} not found", hash),
                status: Some(404),
            }),
        }
    }

    /// Accepted transactions, newest first; only paging is honoured
    async fn get_transactions(&self, query: &TransactionQuery) -> SdkResult<Vec<Transaction>> {
        let state = self.state();
        let mut listed: Vec<_> = state.by_hash.iter().map(|(hash, nonce)| (*nonce, *hash)).collect();
        listed.sort_unstable_by(|a, b| b.cmp(a));

        Ok(listed
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .map(|(nonce, hash)| sample_transaction(hash, nonce, 1, TransactionState::Processed))
            .collect())
    }

    async fn get_last_block(&self) -> SdkResult<Block> {
        Ok(Block {
            number: 100,
            hash: None,
            chain_id: CHAIN_ID,
        })
    }

    async fn get_tokens(&self, _wallet: Option<Address>, _include_public: bool) -> SdkResult<Tokens> {
        Ok(Tokens {
            private: vec![self.token()],
            public: Vec::new(),
        })
    }

    async fn get_token(&self, contract: Address) -> SdkResult<Token> {
        if contract == self.token_contract() {
            Ok(self.token())
        } else {
            Err(SdkError::not_found(format!("token {:?} not found", contract)))
        }
    }

    fn has_credentials(&self) -> bool {
        self.credentials
    }
}

pub fn address_info(transaction_count: u64) -> AddressInfo {
    AddressInfo {
        transaction_count,
        balances: Balances::default(),
    }
}

pub fn sample_transaction(hash: H256, nonce: u64, confirms: u64, state: TransactionState) -> Transaction {
    Transaction {
        hash,
        nonce,
        from_address: Address::zero(),
        to_address: Address::repeat_byte(0x42),
        value: U256::zero(),
        confirms: Some(confirms),
        state,
        block_hash: None,
        block_number: None,
        chain_id: Some(CHAIN_ID),
        contract: None,
        timestamp: None,
    }
}

/// Wallet on `ledger` that is already set up
pub fn ready_wallet(ledger: Arc<MemoryLedger>, strategy: TransferStrategy) -> Wallet {
    let contract = ledger.token_contract();
    let wallet = Wallet::new(
        TEST_PRIVATE_KEY,
        "QBX",
        ledger,
        strategy,
        RetryConfig::default(),
    )
    .expect("valid wallet");
    wallet
        .install(TransactionBuilder::new(contract, CHAIN_ID))
        .expect("fresh wallet");
    wallet
}
