//! Executor configuration
//!
//! Loaded from a JSON file; every field has a default, so a partial file (or `{}`) is valid.

use crate::backend::interpreted::DEFAULT_FUEL;
use crate::backend::DEFAULT_MIN_BLOCK_NUMBER;
use crate::submit::DEFAULT_GAS_SURCHARGE;
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Runtime selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Bytecode,
    Interpreted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub backend: BackendKind,
    /// Block numbers handed to programs are clamped up to this
    pub min_block_number: u64,
    /// Added to the chain's suggested gas price (wei)
    pub gas_price_surcharge: u128,
    /// Enclave key material file, created on first start
    pub key_path: PathBuf,
    /// Off-chain store root; in-memory when unset
    pub store_dir: Option<PathBuf>,
    /// Account that sends registration and output transactions
    pub sender: Address,
    /// Management registry address
    pub registry: Address,
    /// Interpreter fuel per call
    pub fuel: u64,
    /// Stake sent with the registration (wei)
    pub stake: U256,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Interpreted,
            min_block_number: DEFAULT_MIN_BLOCK_NUMBER,
            gas_price_surcharge: DEFAULT_GAS_SURCHARGE,
            key_path: PathBuf::from("enclave-keys.json"),
            store_dir: None,
            sender: Address::ZERO,
            registry: Address::ZERO,
            fuel: DEFAULT_FUEL,
            stake: U256::from(1_000_000_000_000_000_000u128),
        }
    }
}

impl ExecutorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
