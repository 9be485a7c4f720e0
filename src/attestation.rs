//! Attestation stub: bind the enclave signing key to a measurement
//!
//! Real quote generation belongs to the TEE platform. The stub produces a quote the
//! registry can store at registration:
//! 1. the measurement identifies the executor build
//! 2. the binding hashes measurement, signing key, nonce and timestamp together
//! 3. a verifier checks freshness, binding and trusted measurements

use crate::crypto::signer::address_of;
use crate::crypto::EnclaveSigner;
use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const DOMAIN: &[u8] = b"tee-exec-attestation-quote-v1";

/// A quote binding the enclave's signing key to the running build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationQuote {
    /// Hex SHA-256 identifying the executor build
    pub measurement: String,
    /// Hex `X || Y` signing key
    pub public_key: String,
    pub enclave_address: Address,
    /// Challenger-provided freshness value
    pub nonce: String,
    pub timestamp: DateTime<Utc>,
    /// Hex SHA-256 over all of the above
    pub binding: String,
}

impl AttestationQuote {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Policy for accepting quotes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationPolicy {
    /// Accepted measurements (empty = accept any)
    pub trusted_measurements: Vec<String>,
    pub max_quote_age_secs: i64,
}

impl Default for AttestationPolicy {
    fn default() -> Self {
        Self {
            trusted_measurements: Vec::new(),
            max_quote_age_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttestationVerdict {
    Trusted { enclave_address: Address },
    Untrusted { reason: String },
    Invalid { reason: String },
    Expired,
}

impl AttestationVerdict {
    pub fn is_trusted(&self) -> bool {
        matches!(self, AttestationVerdict::Trusted { .. })
    }
}

/// Measurement of this executor build
pub fn measurement() -> String {
    let mut h = Sha256::new();
    h.update(env!("CARGO_PKG_NAME").as_bytes());
    h.update(env!("CARGO_PKG_VERSION").as_bytes());
    hex::encode(h.finalize())
}

pub fn generate_quote(signer: &EnclaveSigner, nonce: &str) -> AttestationQuote {
    let measurement = measurement();
    let public_key = hex::encode(signer.public_key());
    let timestamp = Utc::now();
    let binding = binding(&measurement, &public_key, nonce, &timestamp);
    AttestationQuote {
        measurement,
        public_key,
        enclave_address: signer.address(),
        nonce: nonce.to_string(),
        timestamp,
        binding,
    }
}

pub fn verify_quote(quote: &AttestationQuote, policy: &AttestationPolicy) -> AttestationVerdict {
    let age = (Utc::now() - quote.timestamp).num_seconds();
    if age > policy.max_quote_age_secs {
        return AttestationVerdict::Expired;
    }

    let expected = binding(&quote.measurement, &quote.public_key, &quote.nonce, &quote.timestamp);
    if quote.binding != expected {
        return AttestationVerdict::Invalid {
            reason: "Quote binding mismatch".into(),
        };
    }

    let key: Option<[u8; 64]> = hex::decode(&quote.public_key)
        .ok()
        .and_then(|bytes| bytes.try_into().ok());
    match key {
        Some(key) if address_of(&key) == quote.enclave_address => {}
        _ => {
            return AttestationVerdict::Invalid {
                reason: "Public key does not match enclave address".into(),
            }
        }
    }

    if !policy.trusted_measurements.is_empty()
        && !policy.trusted_measurements.contains(&quote.measurement)
    {
        return AttestationVerdict::Untrusted {
            reason: format!("Measurement {} not trusted", quote.measurement),
        };
    }

    AttestationVerdict::Trusted {
        enclave_address: quote.enclave_address,
    }
}

fn binding(measurement: &str, public_key: &str, nonce: &str, timestamp: &DateTime<Utc>) -> String {
    let mut h = Sha256::new();
    h.update(measurement.as_bytes());
    h.update(public_key.as_bytes());
    h.update(nonce.as_bytes());
    h.update(timestamp.timestamp_millis().to_le_bytes());
    h.update(DOMAIN);
    hex::encode(h.finalize())
}
