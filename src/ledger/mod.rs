//! Ledger client seam
//!
//! The executor only talks to the chain through [`Ledger`]:
//! - event retrieval for a block range
//! - block lookup and the management registry's read calls (pointers, registration,
//!   last processed block, canonical output hashing)
//! - transaction plumbing (pending nonce, gas price, gas estimate, send)
//!
//! [`memory::MemoryLedger`] implements the registry in-process for development and tests.

pub mod abi;
pub mod memory;

pub use memory::MemoryLedger;

use crate::types::{BlockInfo, Event, Output};
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Ledger transport errors. Any of these aborts the round.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Block {0} not found")]
    BlockNotFound(u64),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("ABI error: {0}")]
    Abi(String),
}

/// An unsigned transaction handed to the ledger client for signing and broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub value: U256,
    pub input: Bytes,
}

/// An enclave registration held by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Uncompressed `X || Y` enclave signing key
    pub public_key: Bytes,
    pub stake: U256,
    pub attestation: Bytes,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Current head block number
    async fn block_number(&self) -> Result<u64, LedgerError>;

    async fn block(&self, number: u64) -> Result<BlockInfo, LedgerError>;

    /// Deploy and Execution events in `[from, to]`, in chain order
    async fn events(&self, from: u64, to: u64) -> Result<Vec<Event>, LedgerError>;

    async fn info_pointer(&self, program: Address) -> Result<B256, LedgerError>;

    async fn code_pointer(&self, program: Address) -> Result<B256, LedgerError>;

    async fn states_pointer(&self, program: Address) -> Result<B256, LedgerError>;

    /// Last block whose outputs the registry has accepted
    async fn latest_processed_block(&self) -> Result<u64, LedgerError>;

    /// The registry's canonical digest of an output batch
    async fn hash_outputs(
        &self,
        start: &BlockInfo,
        end: &BlockInfo,
        outputs: &[Output],
    ) -> Result<B256, LedgerError>;

    async fn enclave_registration(&self, account: Address)
        -> Result<Option<Registration>, LedgerError>;

    async fn pending_nonce(&self, account: Address) -> Result<u64, LedgerError>;

    async fn gas_price(&self) -> Result<u128, LedgerError>;

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, LedgerError>;

    /// Sign (with the sender account) and broadcast; returns the transaction hash
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256, LedgerError>;
}
