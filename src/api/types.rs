//! Ledger API entities
//!
//! Only the fields the sender and the recovery engine rely on are strict;
//! everything else is optional so that additive server changes do not break
//! deserialisation.

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

/// On-chain view of an address
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInfo {
    /// Number of transactions already mined from this address
    #[serde(deserialize_with = "de_quantity")]
    pub transaction_count: u64,
    #[serde(default)]
    pub balances: Balances,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Balances {
    #[serde(default)]
    pub private: HashMap<String, Balance>,
    #[serde(default)]
    pub public: Option<HashMap<String, Balance>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    #[serde(deserialize_with = "de_amount")]
    pub balance: U256,
    pub contract_address: Address,
}

/// Loyalty token as listed by the API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub contract_address: Address,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub decimals: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default, deserialize_with = "de_amount")]
    pub total_supply: U256,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Tokens {
    #[serde(default)]
    pub private: Vec<Token>,
    #[serde(default)]
    pub public: Vec<Token>,
}

impl Tokens {
    /// Find a private (loyalty chain) token by symbol
    pub fn private_by_symbol(&self, symbol: &str) -> Option<&Token> {
        self.private.iter().find(|t| t.symbol == symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Pending,
    Processed,
}

/// Transaction record returned on submission and when polling
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: H256,
    #[serde(deserialize_with = "de_quantity")]
    pub nonce: u64,
    #[serde(rename = "from")]
    pub from_address: Address,
    #[serde(rename = "to")]
    pub to_address: Address,
    #[serde(default, deserialize_with = "de_amount")]
    pub value: U256,
    #[serde(default, deserialize_with = "de_opt_quantity")]
    pub confirms: Option<u64>,
    pub state: TransactionState,
    #[serde(default)]
    pub block_hash: Option<H256>,
    #[serde(default, deserialize_with = "de_opt_quantity")]
    pub block_number: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_quantity")]
    pub chain_id: Option<u64>,
    #[serde(default, alias = "contractAddress")]
    pub contract: Option<Address>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Confirmation count, zero while unknown
    pub fn confirmations(&self) -> u64 {
        self.confirms.unwrap_or(0)
    }

    pub fn is_confirmed(&self, required: u64) -> bool {
        self.confirmations() >= required
    }
}

/// Latest block, used for the chain id
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(deserialize_with = "de_quantity")]
    pub number: u64,
    #[serde(default)]
    pub hash: Option<H256>,
    #[serde(deserialize_with = "de_quantity")]
    pub chain_id: u64,
}

/// Body of `GET /tokens/{contract}`
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub private: Token,
}

pub const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Filter and page for transaction listings, newest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionQuery {
    /// Only transactions to or from this address
    pub wallet: Option<Address>,
    pub symbol: Option<String>,
    pub contract_address: Option<Address>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for TransactionQuery {
    fn default() -> Self {
        Self {
            wallet: None,
            symbol: None,
            contract_address: None,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl TransactionQuery {
    pub fn for_wallet(wallet: Address) -> Self {
        Self {
            wallet: Some(wallet),
            ..Self::default()
        }
    }

    pub fn page(mut self, offset: u32, limit: u32) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

/// Body of the stored-nonce endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct NonceResponse {
    #[serde(deserialize_with = "de_quantity")]
    pub result: u64,
}

/// Error body sent by the API alongside non-2xx statuses
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

/// Parse a quantity given as a JSON number, a decimal string or a 0x-hex string
pub fn parse_quantity(value: &serde_json::Value) -> Result<u64, String> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| format!("quantity {} is not a non-negative integer", n)),
        serde_json::Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16)
                .map_err(|e| format!("invalid hex quantity {}: {}", s, e)),
            None => s
                .parse::<u64>()
                .map_err(|e| format!("invalid quantity {}: {}", s, e)),
        },
        other => Err(format!("unexpected quantity {}", other)),
    }
}

fn parse_amount(value: &serde_json::Value) -> Result<U256, String> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| format!("amount {} is not a non-negative integer", n)),
        serde_json::Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => U256::from_str_radix(hex, 16)
                .map_err(|e| format!("invalid hex amount {}: {}", s, e)),
            None => U256::from_dec_str(s).map_err(|e| format!("invalid amount {}: {}", s, e)),
        },
        serde_json::Value::Null => Ok(U256::zero()),
        other => Err(format!("unexpected amount {}", other)),
    }
}

fn de_quantity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    parse_quantity(&value).map_err(serde::de::Error::custom)
}

fn de_opt_quantity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => parse_quantity(&v).map(Some).map_err(serde::de::Error::custom),
    }
}

fn de_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    parse_amount(&value).map_err(serde::de::Error::custom)
}
