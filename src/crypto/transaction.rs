//! Transaction channel: one-shot hybrid encryption to the enclave.
//!
//! Uses X25519 for key agreement, HKDF-SHA256 for key derivation and ChaCha20-Poly1305 for
//! the payload. Only the enclave holds the static secret matching the published
//! "transaction public key".

use super::CryptoError;
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, KeyInit, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

/// Size of an X25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of the ChaCha20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of the Poly1305 tag in bytes.
pub const TAG_SIZE: usize = 16;

const HKDF_INFO: &[u8] = b"tee-exec-transaction-v1";

/// The enclave's transaction keypair.
#[derive(Clone)]
pub struct TransactionKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl TransactionKeypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        Self::from_secret_bytes(secret.to_bytes())
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// The published transaction public key
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Decrypt a payload sealed to `declared_key`.
    ///
    /// Only the currently active key is held; a payload declaring any other key fails.
    pub fn decrypt(&self, ciphertext: &[u8], declared_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if declared_key != self.public.as_bytes() {
            return Err(CryptoError::UnknownTransactionKey(hex::encode(declared_key)));
        }
        open(&self.secret, ciphertext)
    }
}

impl std::fmt::Debug for TransactionKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionKeypair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .finish()
    }
}

/// Seal `plaintext` to a transaction public key.
///
/// Output layout: `ephemeral_pubkey (32) || nonce (12) || ciphertext || tag (16)`.
pub fn seal(recipient: &[u8; PUBLIC_KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient));

    let cipher = derive_cipher(shared.as_bytes())?;
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    let body = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE + NONCE_SIZE + body.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&body);
    Ok(out)
}

fn open(secret: &StaticSecret, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let min = PUBLIC_KEY_SIZE + NONCE_SIZE + TAG_SIZE;
    if ciphertext.len() < min {
        return Err(CryptoError::CiphertextTooShort {
            len: ciphertext.len(),
            min,
        });
    }

    let mut ephemeral = [0u8; PUBLIC_KEY_SIZE];
    ephemeral.copy_from_slice(&ciphertext[..PUBLIC_KEY_SIZE]);
    let nonce = Nonce::from_slice(&ciphertext[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + NONCE_SIZE]);
    let body = &ciphertext[PUBLIC_KEY_SIZE + NONCE_SIZE..];

    let shared = secret.diffie_hellman(&PublicKey::from(ephemeral));
    derive_cipher(shared.as_bytes())?
        .decrypt(nonce, body)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

fn derive_cipher(shared: &[u8; 32]) -> Result<ChaCha20Poly1305, CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut key = [0u8; 32];
    hk.expand(HKDF_INFO, &mut key)
        .map_err(|_| CryptoError::EncryptionFailed("HKDF expansion failed".into()))?;
    ChaCha20Poly1305::new_from_slice(&key).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}
