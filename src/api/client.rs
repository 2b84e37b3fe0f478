//! HTTP implementation of the ledger API

use super::types::{
    AddressInfo, Block, ErrorBody, NonceResponse, Token, TokenResponse, Tokens, Transaction,
    TransactionQuery,
};
use super::LedgerApi;
use crate::error::{SdkError, SdkResult};
use crate::tx::SignedPayload;

use async_trait::async_trait;
use ethers::types::{Address, H256};
use ethers::utils::to_checksum;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

pub const API_VERSION: &str = "0.0.1";

/// Which public deployment of the API to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiMode {
    #[default]
    Sandbox,
    Live,
}

impl ApiMode {
    pub fn host(&self) -> &'static str {
        match self {
            ApiMode::Sandbox => "https://api-sandbox.qiibee.com",
            ApiMode::Live => "https://api.qiibee.com",
        }
    }
}

/// reqwest-backed ledger API client
#[derive(Clone)]
pub struct HttpLedgerApi {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl fmt::Debug for HttpLedgerApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpLedgerApi")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpLedgerApi {
    /// Create a client against one of the public deployments
    pub fn new(api_key: Option<String>, mode: ApiMode, timeout: Duration) -> SdkResult<Self> {
        Self::with_base_url(api_key, mode.host(), timeout)
    }

    /// Create a client against an explicit base URL
    pub fn with_base_url(
        api_key: Option<String>,
        base_url: &str,
        timeout: Duration,
    ) -> SdkResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SdkError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("ApiVersion", API_VERSION)
    }

    fn authenticated(&self, method: Method, path: &str) -> SdkResult<RequestBuilder> {
        let key = self.api_key.as_ref().ok_or_else(|| {
            SdkError::Config("An API key is required for stored nonce operations".to_string())
        })?;
        Ok(self.request(method, path).bearer_auth(key))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> SdkResult<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        serde_json::from_slice(&body).map_err(|e| SdkError::ServerResponseParse(e.to_string()))
    }

    fn nonce_path(address: Address) -> String {
        format!("/addresses/{}/nonce", to_checksum(&address, None))
    }
}

/// Map a non-2xx response onto the error taxonomy
pub(crate) fn status_error(status: StatusCode, body: &[u8]) -> SdkError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });
    let code = Some(status.as_u16());

    match status {
        StatusCode::BAD_REQUEST => SdkError::InvalidRequest {
            message,
            status: code,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SdkError::Authorization {
            message,
            status: code,
        },
        StatusCode::NOT_FOUND => SdkError::NotFound {
            message,
            status: code,
        },
        StatusCode::CONFLICT => SdkError::Conflict {
            message,
            status: code,
        },
        other => SdkError::Http {
            status: other.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl LedgerApi for HttpLedgerApi {
    async fn get_address(&self, address: Address) -> SdkResult<AddressInfo> {
        let path = format!("/addresses/{}", to_checksum(&address, None));
        self.send(self.request(Method::GET, &path)).await
    }

    async fn get_stored_nonce(&self, address: Address) -> SdkResult<u64> {
        let request = self.authenticated(Method::GET, &Self::nonce_path(address))?;
        let body: NonceResponse = self.send(request).await?;
        Ok(body.result)
    }

    async fn set_stored_nonce(&self, address: Address, nonce: u64) -> SdkResult<u64> {
        let request = self
            .authenticated(Method::PUT, &Self::nonce_path(address))?
            .json(&serde_json::json!({ "nonce": nonce }));
        let body: NonceResponse = self.send(request).await?;
        debug!("Stored nonce for {:?} set to {}", address, body.result);
        Ok(body.result)
    }

    async fn increment_stored_nonce(&self, address: Address) -> SdkResult<u64> {
        let request = self.authenticated(Method::PATCH, &Self::nonce_path(address))?;
        let body: NonceResponse = self.send(request).await?;
        Ok(body.result)
    }

    async fn submit_signed_transaction(&self, payload: &SignedPayload) -> SdkResult<Transaction> {
        let request = self
            .request(Method::POST, "/transactions/")
            .form(&[("data", payload.to_hex())]);
        self.send(request).await
    }

    async fn get_transaction(&self, hash: H256) -> SdkResult<Transaction> {
        let path = format!("/transactions/{:?}", hash);
        self.send(self.request(Method::GET, &path)).await
    }

    async fn get_transactions(&self, query: &TransactionQuery) -> SdkResult<Vec<Transaction>> {
        let mut params: Vec<(&str, String)> = vec![
            ("offset", query.offset.to_string()),
            ("limit", query.limit.to_string()),
        ];
        if let Some(wallet) = query.wallet {
            params.push(("wallet", to_checksum(&wallet, None)));
        }
        if let Some(symbol) = &query.symbol {
            params.push(("symbol", symbol.clone()));
        }
        if let Some(contract) = query.contract_address {
            params.push(("contractAddress", to_checksum(&contract, None)));
        }

        let request = self.request(Method::GET, "/transactions").query(&params);
        self.send(request).await
    }

    async fn get_last_block(&self) -> SdkResult<Block> {
        self.send(self.request(Method::GET, "/net")).await
    }

    async fn get_tokens(&self, wallet: Option<Address>, include_public: bool) -> SdkResult<Tokens> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(wallet) = wallet {
            query.push(("walletAddress", to_checksum(&wallet, None)));
        }
        if include_public {
            query.push(("public", "true".to_string()));
        }

        let request = self.request(Method::GET, "/tokens").query(&query);
        self.send(request).await
    }

    async fn get_token(&self, contract: Address) -> SdkResult<Token> {
        let path = format!("/tokens/{}", to_checksum(&contract, None));
        let body: TokenResponse = self.send(self.request(Method::GET, &path)).await?;
        Ok(body.private)
    }

    fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }
}
