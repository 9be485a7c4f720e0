//! Caller-side helpers
//!
//! Callers seal Deploy and Execution payloads to the enclave's published transaction key
//! and open Execution results with the one-time key they chose for the call.

use crate::crypto::transaction::{self, PUBLIC_KEY_SIZE};
use crate::crypto::{CryptoError, SymmetricKey};
use crate::program::ProgramConfig;

/// Encrypted payloads of a Deploy event.
#[derive(Debug, Clone)]
pub struct SealedDeploy {
    pub encrypted_code: Vec<u8>,
    pub encrypted_config: Vec<u8>,
    /// The enclave key the payloads were sealed to
    pub transaction_key: Vec<u8>,
}

/// Encrypted payloads of an Execution event, plus the result key to keep.
#[derive(Debug, Clone)]
pub struct SealedCall {
    pub encrypted_input: Vec<u8>,
    pub encrypted_result_key: Vec<u8>,
    pub transaction_key: Vec<u8>,
    pub result_key: SymmetricKey,
}

pub fn seal_deploy(
    enclave_key: &[u8; PUBLIC_KEY_SIZE],
    code: &[u8],
    config: &ProgramConfig,
) -> Result<SealedDeploy, CryptoError> {
    let config = config
        .to_json()
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    Ok(SealedDeploy {
        encrypted_code: transaction::seal(enclave_key, code)?,
        encrypted_config: transaction::seal(enclave_key, &config)?,
        transaction_key: enclave_key.to_vec(),
    })
}

/// Seal a call input together with a freshly drawn result key.
pub fn seal_call(enclave_key: &[u8; PUBLIC_KEY_SIZE], input: &[u8]) -> Result<SealedCall, CryptoError> {
    let result_key = SymmetricKey::generate();
    Ok(SealedCall {
        encrypted_input: transaction::seal(enclave_key, input)?,
        encrypted_result_key: transaction::seal(enclave_key, result_key.to_hex().as_bytes())?,
        transaction_key: enclave_key.to_vec(),
        result_key,
    })
}

pub fn open_result(result_key: &SymmetricKey, encrypted_result: &[u8]) -> Result<Vec<u8>, CryptoError> {
    result_key.decrypt(encrypted_result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::TransactionKeypair;

    #[test]
    fn test_enclave_opens_sealed_call() {
        let enclave = TransactionKeypair::generate();
        let sealed = seal_call(&enclave.public_key(), b"{}").unwrap();

        let input = enclave
            .decrypt(&sealed.encrypted_input, &sealed.transaction_key)
            .unwrap();
        assert_eq!(input, b"{}");
        let key_text = enclave
            .decrypt(&sealed.encrypted_result_key, &sealed.transaction_key)
            .unwrap();
        assert_eq!(SymmetricKey::from_encoded(&key_text).unwrap(), sealed.result_key);
    }

    #[test]
    fn test_open_result() {
        let key = SymmetricKey::generate();
        let ct = key.encrypt(b"42").unwrap();
        assert_eq!(open_result(&key, &ct).unwrap(), b"42");
        assert!(open_result(&SymmetricKey::generate(), &ct).map(|p| p != b"42").unwrap_or(true));
    }

    #[test]
    fn test_deploy_config_roundtrip() {
        let enclave = TransactionKeypair::generate();
        let config = ProgramConfig {
            key_rotation: 5,
            ..Default::default()
        };
        let sealed = seal_deploy(&enclave.public_key(), b"code", &config).unwrap();
        let plain = enclave
            .decrypt(&sealed.encrypted_config, &sealed.transaction_key)
            .unwrap();
        assert_eq!(ProgramConfig::from_json(&plain).unwrap(), config);
    }
}
