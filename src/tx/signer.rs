//! Local signing with the brand key
//!
//! The key is parsed once, at construction, and lives inside the signer for
//! as long as the wallet does. Only signed bytes leave this module.

use super::builder::{TransactionKind, UnsignedTransaction};
use crate::error::{SdkError, SdkResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256};
use ethers::utils::{keccak256, to_checksum};
use std::fmt;

/// Holds the brand private key
pub struct BrandSigner {
    wallet: LocalWallet,
}

impl BrandSigner {
    /// Parse a hex-encoded private key (with or without 0x prefix)
    pub fn from_private_key(private_key_hex: &str) -> SdkResult<Self> {
        let key_hex = private_key_hex
            .trim()
            .strip_prefix("0x")
            .unwrap_or_else(|| private_key_hex.trim());

        // never echo the parse error, it can quote key material
        let wallet = key_hex
            .parse::<LocalWallet>()
            .map_err(|_| SdkError::Config("Invalid brand private key".to_string()))?;

        Ok(Self { wallet })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn checksum_address(&self) -> String {
        to_checksum(&self.wallet.address(), None)
    }

    /// Sign `unsigned`, producing the bytes handed to the ledger
    pub fn sign(&self, unsigned: &UnsignedTransaction) -> SdkResult<SignedPayload> {
        let signature = self
            .wallet
            .sign_transaction_sync(&unsigned.tx)
            .map_err(|e| SdkError::Signing(e.to_string()))?;

        let raw = unsigned.tx.rlp_signed(&signature);
        Ok(SignedPayload {
            hash: H256::from(keccak256(&raw)),
            raw,
            nonce: unsigned.nonce,
            kind: unsigned.kind,
        })
    }
}

impl fmt::Debug for BrandSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrandSigner")
            .field("address", &self.checksum_address())
            .finish_non_exhaustive()
    }
}

/// Signed transaction bytes plus the metadata needed to log them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    raw: Bytes,
    hash: H256,
    nonce: u64,
    kind: TransactionKind,
}

impl SignedPayload {
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// 0x-prefixed hex encoding used on the wire
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }

    /// Hash the chain will assign to this transaction
    pub fn hash(&self) -> H256 {
        self.hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TEST_PRIVATE_KEY;
    use crate::tx::builder::{TransactionBuilder, TransferRequest};

    #[test]
    fn test_signer_address() {
        let signer = BrandSigner::from_private_key(TEST_PRIVATE_KEY).unwrap();
        assert_eq!(
            signer.checksum_address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );

        let prefixed = BrandSigner::from_private_key(&format!("0x{}", TEST_PRIVATE_KEY)).unwrap();
        assert_eq!(prefixed.address(), signer.address());
    }

    #[test]
    fn test_invalid_key_is_config_error() {
        let err = BrandSigner::from_private_key("not-a-key").unwrap_err();
        assert!(matches!(err, SdkError::Config(_)));

        let short = BrandSigner::from_private_key("0xdeadbeef").unwrap_err();
        assert!(!short.to_string().contains("deadbeef"));
    }

    #[test]
    fn test_debug_never_prints_key() {
        let signer = BrandSigner::from_private_key(TEST_PRIVATE_KEY).unwrap();
        let printed = format!("{:?}", signer);
        assert!(!printed.contains(TEST_PRIVATE_KEY));
        assert!(printed.contains("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"));
    }

    #[test]
    fn test_sign_produces_hashed_payload() {
        let signer = BrandSigner::from_private_key(TEST_PRIVATE_KEY).unwrap();
        let builder = TransactionBuilder::new(Address::repeat_byte(0x11), 1729);
        let unsigned = builder.build(&TransferRequest::new(Address::repeat_byte(0x22), 5u64), 3);

        let payload = signer.sign(&unsigned).unwrap();
        assert_eq!(payload.nonce(), 3);
        assert_eq!(payload.hash(), H256::from(keccak256(payload.raw())));
        assert!(payload.to_hex().starts_with("0x"));
        assert_eq!(payload.to_hex().len(), 2 + payload.raw().len() * 2);

        // deterministic (RFC 6979) signatures
        assert_eq!(signer.sign(&unsigned).unwrap(), payload);
    }
}
