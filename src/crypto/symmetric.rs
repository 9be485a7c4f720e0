//! Symmetric channel: AES-256 in CFB mode
//!
//! Ciphertext layout: `iv (16) || cfb(pkcs7(plaintext))`. A fresh IV is drawn for every
//! encryption, so encrypting the same state twice yields unrelated blobs (and hashes).

use super::CryptoError;
use aes::Aes256;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;

/// AES block size; also the IV length.
pub const BLOCK_SIZE: usize = 16;

/// Key length in bytes.
pub const KEY_SIZE: usize = 32;

/// A 256-bit symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Draw a fresh random key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a key as raw 32 bytes or as hex text (optionally `0x`-prefixed).
    ///
    /// Callers ship their one-time result key either way.
    pub fn from_encoded(encoded: &[u8]) -> Result<Self, CryptoError> {
        if encoded.len() == KEY_SIZE {
            let mut key = [0u8; KEY_SIZE];
            key.copy_from_slice(encoded);
            return Ok(Self(key));
        }
        let text = std::str::from_utf8(encoded)
            .map_err(|_| CryptoError::InvalidKey(format!("{} raw bytes", encoded.len())))?;
        Self::from_hex(text.trim())
    }

    pub fn from_hex(text: &str) -> Result<Self, CryptoError> {
        let text = text.strip_prefix("0x").unwrap_or(text);
        let bytes = hex::decode(text).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let key: [u8; KEY_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected {} bytes, got {}", KEY_SIZE, bytes.len())))?;
        Ok(Self(key))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Encrypt `plaintext` under this key with a random IV
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut iv = [0u8; BLOCK_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let mut body = pkcs7_pad(plaintext);
        Aes256CfbEnc::new_from_slices(&self.0, &iv)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?
            .encrypt(&mut body);

        let mut out = Vec::with_capacity(BLOCK_SIZE + body.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decrypt a ciphertext produced by [`SymmetricKey::encrypt`]
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < BLOCK_SIZE {
            return Err(CryptoError::CiphertextTooShort {
                len: ciphertext.len(),
                min: BLOCK_SIZE,
            });
        }
        let (iv, body) = ciphertext.split_at(BLOCK_SIZE);
        let mut body = body.to_vec();
        Aes256CfbDec::new_from_slices(&self.0, iv)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?
            .decrypt(&mut body);
        pkcs7_unpad(body)
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

impl Serialize for SymmetricKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SymmetricKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        SymmetricKey::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);
    out
}

fn pkcs7_unpad(mut data: Vec<u8>) -> Result<Vec<u8>, CryptoError> {
    let pad = *data.last().ok_or(CryptoError::InvalidPadding)? as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > data.len() {
        return Err(CryptoError::InvalidPadding);
    }
    if !data[data.len() - pad..].iter().all(|&b| b as usize == pad) {
        return Err(CryptoError::InvalidPadding);
    }
    data.truncate(data.len() - pad);
    Ok(data)
}
