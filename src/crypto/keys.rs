//! Enclave key material
//!
//! Three secrets live only inside the enclave:
//! - the management key, which encrypts every program's info record
//! - the transaction keypair, whose public half callers seal payloads to
//! - the signing key, which signs output batches and identifies the enclave on-chain
//!
//! Material is persisted as a small JSON file of hex strings. There is no rotation or
//! re-registration ceremony; a new file means a new enclave identity.

use super::{CryptoError, EnclaveSigner, SymmetricKey, TransactionKeypair};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    management: String,
    transaction: String,
    signing: String,
}

/// All key material held by the enclave.
#[derive(Debug, Clone)]
pub struct EnclaveKeys {
    pub management: SymmetricKey,
    pub transaction: TransactionKeypair,
    pub signer: EnclaveSigner,
}

impl EnclaveKeys {
    /// Fresh random material
    pub fn generate() -> Self {
        Self {
            management: SymmetricKey::generate(),
            transaction: TransactionKeypair::generate(),
            signer: EnclaveSigner::generate(),
        }
    }

    /// Load key material from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CryptoError::KeyFile(format!("{}: {}", path.display(), e)))?;
        let file: KeyFile =
            serde_json::from_str(&json).map_err(|e| CryptoError::KeyFile(e.to_string()))?;

        let management = SymmetricKey::from_hex(&file.management)?;
        let transaction_bytes = decode_32(&file.transaction)?;
        let signer = EnclaveSigner::from_bytes(&decode_32(&file.signing)?)?;

        Ok(Self {
            management,
            transaction: TransactionKeypair::from_secret_bytes(transaction_bytes),
            signer,
        })
    }

    /// Save key material to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CryptoError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| CryptoError::KeyFile(e.to_string()))?;
            }
        }
        let file = KeyFile {
            management: self.management.to_hex(),
            transaction: hex::encode(self.transaction.secret_bytes()),
            signing: hex::encode(self.signer.to_bytes()),
        };
        let json =
            serde_json::to_string_pretty(&file).map_err(|e| CryptoError::KeyFile(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| CryptoError::KeyFile(e.to_string()))
    }

    /// Load the file if present, otherwise generate and persist new material
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        let keys = Self::generate();
        keys.save(path)?;
        info!(
            "Generated enclave key material at {} (enclave address {})",
            path.display(),
            keys.signer.address()
        );
        Ok(keys)
    }
}

fn decode_32(text: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(text.strip_prefix("0x").unwrap_or(text))
        .map_err(|e| CryptoError::KeyFile(e.to_string()))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::KeyFile(format!("expected 32 bytes, got {}", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        let keys = EnclaveKeys::generate();
        keys.save(&path).unwrap();

        let loaded = EnclaveKeys::load(&path).unwrap();
        assert_eq!(loaded.management, keys.management);
        assert_eq!(loaded.transaction.public_key(), keys.transaction.public_key());
        assert_eq!(loaded.signer.address(), keys.signer.address());
    }

    #[test]
    fn test_load_or_generate_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("keys.json");
        let first = EnclaveKeys::load_or_generate(&path).unwrap();
        let second = EnclaveKeys::load_or_generate(&path).unwrap();
        assert_eq!(first.signer.address(), second.signer.address());
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        std::fs::write(&path, "{\"management\": \"zz\"}").unwrap();
        assert!(matches!(EnclaveKeys::load(&path), Err(CryptoError::KeyFile(_))));
    }
}
