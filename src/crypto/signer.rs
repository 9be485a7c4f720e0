//! Enclave signing key (secp256k1).
//!
//! Signatures are 65 bytes `r || s || v` with `v` the recovery parity (0 or 1), so the
//! registry can recover the enclave address from a batch digest.

use super::CryptoError;
use alloy_primitives::{keccak256, Address, B256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

/// Expected length of a recoverable signature.
pub const SIGNATURE_LENGTH: usize = 65;

/// The enclave's asymmetric signing identity.
#[derive(Clone)]
pub struct EnclaveSigner {
    key: SigningKey,
}

impl EnclaveSigner {
    pub fn generate() -> Self {
        Self {
            key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "signing key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let key = SigningKey::from_slice(bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.key.to_bytes());
        out
    }

    /// Uncompressed `X || Y` public key (64 bytes), as registered on-chain.
    pub fn public_key(&self) -> [u8; 64] {
        raw_public_key(self.key.verifying_key())
    }

    pub fn address(&self) -> Address {
        address_of(&self.public_key())
    }

    /// Sign a 32-byte digest as-is (no message prefix).
    pub fn sign_digest(&self, digest: &B256) -> Result<[u8; SIGNATURE_LENGTH], CryptoError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest.as_slice())
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
        let mut out = [0u8; SIGNATURE_LENGTH];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte();
        Ok(out)
    }
}

impl std::fmt::Debug for EnclaveSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnclaveSigner")
            .field("address", &self.address())
            .finish()
    }
}

/// Recover the signing address from a digest and a 65-byte signature.
///
/// Accepts `v` as either 0/1 or 27/28.
pub fn recover_signer(digest: &B256, signature: &[u8]) -> Result<Address, CryptoError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(CryptoError::RecoveryFailed(format!(
            "signature must be {} bytes, got {}",
            SIGNATURE_LENGTH,
            signature.len()
        )));
    }
    let v = match signature[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        v => return Err(CryptoError::RecoveryFailed(format!("bad recovery byte {}", v))),
    };
    let recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| CryptoError::RecoveryFailed(format!("bad recovery byte {}", v)))?;
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| CryptoError::RecoveryFailed(e.to_string()))?;
    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &sig, recovery_id)
        .map_err(|e| CryptoError::RecoveryFailed(e.to_string()))?;
    Ok(address_of(&raw_public_key(&key)))
}

/// Address of an `X || Y` public key: last 20 bytes of its keccak hash.
pub fn address_of(public_key: &[u8; 64]) -> Address {
    Address::from_slice(&keccak256(public_key)[12..])
}

fn raw_public_key(key: &VerifyingKey) -> [u8; 64] {
    let point = key.to_encoded_point(false);
    let mut out = [0u8; 64];
    // skip the 0x04 uncompressed marker
    out.copy_from_slice(&point.as_bytes()[1..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_recover() {
        let signer = EnclaveSigner::generate();
        let digest = keccak256(b"outputs batch");
        let sig = signer.sign_digest(&digest).unwrap();
        assert_eq!(sig.len(), SIGNATURE_LENGTH);
        assert!(sig[64] <= 1);
        assert_eq!(recover_signer(&digest, &sig).unwrap(), signer.address());
    }

    #[test]
    fn test_recover_with_ethereum_v() {
        let signer = EnclaveSigner::generate();
        let digest = keccak256(b"batch");
        let mut sig = signer.sign_digest(&digest).unwrap();
        sig[64] += 27;
        assert_eq!(recover_signer(&digest, &sig).unwrap(), signer.address());
    }

    #[test]
    fn test_other_digest_recovers_other_address() {
        let signer = EnclaveSigner::generate();
        let sig = signer.sign_digest(&keccak256(b"a")).unwrap();
        let recovered = recover_signer(&keccak256(b"b"), &sig);
        assert!(recovered.map(|a| a != signer.address()).unwrap_or(true));
    }

    #[test]
    fn test_known_address() {
        // Anvil's first account
        let bytes =
            hex::decode("ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80").unwrap();
        let signer = EnclaveSigner::from_bytes(&bytes).unwrap();
        let expected: Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
        assert_eq!(signer.address(), expected);
    }

    #[test]
    fn test_key_bytes_roundtrip() {
        let signer = EnclaveSigner::generate();
        let restored = EnclaveSigner::from_bytes(&signer.to_bytes()).unwrap();
        assert_eq!(restored.public_key(), signer.public_key());
        assert!(EnclaveSigner::from_bytes(&[1u8; 31]).is_err());
    }
}
