//! Ledger-facing records shared by every stage of a round.
//!
//! Events arrive from the management registry's logs; Outputs leave in the signed batch.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// Block descriptor used as a verifiable batch boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
}

/// Encrypted payloads carried by a registry event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    Deploy {
        encrypted_code: Vec<u8>,
        encrypted_config: Vec<u8>,
    },
    Execution {
        encrypted_input: Vec<u8>,
        encrypted_result_key: Vec<u8>,
    },
}

/// A Deploy or Execution request pulled from the ledger. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub program_address: Address,
    pub caller: Address,
    pub payload: EventPayload,
    /// Transaction public key the payloads were sealed to.
    pub transaction_key: Vec<u8>,
    pub block_number: u64,
    pub block_time: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self.payload {
            EventPayload::Deploy { .. } => "Deploy",
            EventPayload::Execution { .. } => "Execution",
        }
    }

    /// Encrypted result key of an Execution event; empty for Deploy.
    pub fn encrypted_result_key(&self) -> &[u8] {
        match &self.payload {
            EventPayload::Execution {
                encrypted_result_key,
                ..
            } => encrypted_result_key,
            EventPayload::Deploy { .. } => &[],
        }
    }
}

/// Output record type as persisted on-chain (1-byte enum, 3 reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransType {
    Execution = 0,
    Deploy = 1,
    Interact = 2,
    Error = 4,
}

impl TransType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TransType::Execution),
            1 => Some(TransType::Deploy),
            2 => Some(TransType::Interact),
            4 => Some(TransType::Error),
            _ => None,
        }
    }
}

/// One entry of the signed output batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub trans_type: TransType,
    pub program_address: Address,
    pub info: B256,
    pub states: B256,
    /// Code hash, Deploy only.
    pub code: B256,
    /// Encrypted result (Execution) or error message (Error).
    pub result: Vec<u8>,
    pub encrypted_result_key: Vec<u8>,
}

impl Output {
    pub fn deploy(program_address: Address, info: B256, states: B256, code: B256) -> Self {
        Self {
            trans_type: TransType::Deploy,
            program_address,
            info,
            states,
            code,
            result: Vec::new(),
            encrypted_result_key: Vec::new(),
        }
    }

    pub fn execution(
        program_address: Address,
        info: B256,
        states: B256,
        result: Vec<u8>,
        encrypted_result_key: Vec<u8>,
    ) -> Self {
        Self {
            trans_type: TransType::Execution,
            program_address,
            info,
            states,
            code: B256::ZERO,
            result,
            encrypted_result_key,
        }
    }

    pub fn interact(program_address: Address, info: B256, states: B256) -> Self {
        Self {
            trans_type: TransType::Interact,
            program_address,
            info,
            states,
            code: B256::ZERO,
            result: Vec::new(),
            encrypted_result_key: Vec::new(),
        }
    }

    /// Error record: carries the message and the caller's encrypted result key so the
    /// caller stays addressable.
    pub fn error(program_address: Address, message: &str, encrypted_result_key: &[u8]) -> Self {
        Self {
            trans_type: TransType::Error,
            program_address,
            info: B256::ZERO,
            states: B256::ZERO,
            code: B256::ZERO,
            result: message.as_bytes().to_vec(),
            encrypted_result_key: encrypted_result_key.to_vec(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.trans_type == TransType::Error
    }
}
