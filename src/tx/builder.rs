//! Transaction construction for token transfers
//!
//! The loyalty chain is fee-less, so every transaction carries a zero gas
//! price and a fixed gas ceiling. Nonce and chain id are always explicit.

use ethers::abi::{self, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use ethers::utils::id;
use serde::Deserialize;
use std::fmt;

/// Gas ceiling attached to every transaction
pub const GAS_LIMIT: u64 = 1_000_000;

const TRANSFER_SIGNATURE: &str = "transfer(address,uint256)";

/// What a transfer means to the brand; carried into logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    #[default]
    Transfer,
    Reward,
    Debit,
    Redemption,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Transfer => "transfer",
            TransactionKind::Reward => "reward",
            TransactionKind::Debit => "debit",
            TransactionKind::Redemption => "redemption",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "transfer" => Ok(TransactionKind::Transfer),
            "reward" => Ok(TransactionKind::Reward),
            "debit" => Ok(TransactionKind::Debit),
            "redemption" => Ok(TransactionKind::Redemption),
            other => Err(format!("unknown transaction kind: {}", other)),
        }
    }
}

/// A single send request, created per call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub to: Address,
    /// Amount in token base units
    pub value: U256,
    pub kind: TransactionKind,
    /// Explicit nonce; skips allocation and retries when set
    pub nonce: Option<u64>,
}

impl TransferRequest {
    pub fn new(to: Address, value: impl Into<U256>) -> Self {
        Self {
            to,
            value: value.into(),
            kind: TransactionKind::Transfer,
            nonce: None,
        }
    }

    pub fn reward(to: Address, value: impl Into<U256>) -> Self {
        Self::new(to, value).with_kind(TransactionKind::Reward)
    }

    /// Zero-value transfer used to burn an unused nonce
    pub fn noop(sink: Address, nonce: u64) -> Self {
        Self::new(sink, U256::zero()).with_nonce(nonce)
    }

    pub fn with_kind(mut self, kind: TransactionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }
}

/// Unsigned transaction for one nonce
#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
    pub(crate) tx: TypedTransaction,
    pub nonce: u64,
    pub kind: TransactionKind,
}

impl UnsignedTransaction {
    pub fn chain_id(&self) -> Option<u64> {
        self.tx.chain_id().map(|id| id.as_u64())
    }

    pub fn gas_price(&self) -> Option<U256> {
        self.tx.gas_price()
    }

    pub fn gas(&self) -> Option<U256> {
        self.tx.gas().copied()
    }

    pub fn to(&self) -> Option<Address> {
        self.tx.to_addr().copied()
    }

    pub fn data(&self) -> Option<&Bytes> {
        self.tx.data()
    }
}

/// Builds token transfer calls against one contract on one chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionBuilder {
    contract_address: Address,
    chain_id: u64,
    gas_limit: u64,
}

impl TransactionBuilder {
    pub fn new(contract_address: Address, chain_id: u64) -> Self {
        Self {
            contract_address,
            chain_id,
            gas_limit: GAS_LIMIT,
        }
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Build the transfer for `request` at `nonce`
    pub fn build(&self, request: &TransferRequest, nonce: u64) -> UnsignedTransaction {
        let tx = TransactionRequest::new()
            .to(self.contract_address)
            .data(encode_transfer(request.to, request.value))
            .nonce(nonce)
            .gas(self.gas_limit)
            .gas_price(U256::zero())
            .value(U256::zero())
            .chain_id(self.chain_id);

        UnsignedTransaction {
            tx: TypedTransaction::Legacy(tx),
            nonce,
            kind: request.kind,
        }
    }
}

/// ABI-encode `transfer(to, value)`
fn encode_transfer(to: Address, value: U256) -> Bytes {
    let mut data = id(TRANSFER_SIGNATURE).to_vec();
    data.extend(abi::encode(&[Token::Address(to), Token::Uint(value)]));
    Bytes::from(data)
}
