//! Cryptographic services of the enclave
//!
//! - **Hash**: keccak-256 content hashing; the only integrity gate between on-chain pointers
//!   and off-chain blobs
//! - **Symmetric**: AES-256-CFB with a random IV prefix (program state/code, management channel)
//! - **Transaction**: one-shot hybrid channel from any caller to the enclave's published key
//! - **Signer**: secp256k1 recoverable signatures over output-batch digests
//! - **Keys**: enclave key material persisted as JSON

pub mod hash;
pub mod keys;
pub mod signer;
pub mod symmetric;
pub mod transaction;

pub use hash::{hash, match_hash};
pub use keys::EnclaveKeys;
pub use signer::{recover_signer, EnclaveSigner, SIGNATURE_LENGTH};
pub use symmetric::SymmetricKey;
pub use transaction::TransactionKeypair;

/// Crypto-related errors
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Ciphertext too short: {len} < {min}")]
    CiphertextTooShort { len: usize, min: usize },

    #[error("Invalid padding")]
    InvalidPadding,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Unknown transaction key: {0}")]
    UnknownTransactionKey(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Signature recovery failed: {0}")]
    RecoveryFailed(String),

    #[error("Key file error: {0}")]
    KeyFile(String),
}
