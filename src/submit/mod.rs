//! Output submission
//!
//! A round's outputs go on-chain as one `output(startBlock, endBlock, outputs, signature)`
//! transaction:
//! - both boundary blocks are looked up on the ledger
//! - the digest comes from the registry's own `hashOutputs`, never computed locally
//! - the enclave signs the digest and the transaction is sent with a locally tracked nonce

use crate::crypto::{CryptoError, EnclaveSigner};
use crate::ledger::abi::{self, IManagement};
use crate::ledger::{Ledger, LedgerError, TransactionRequest};
use crate::types::Output;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use log::{debug, info};

/// Default gas price surcharge: 1 gwei
pub const DEFAULT_GAS_SURCHARGE: u128 = 1_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Ledger error: {0}")]
    Transport(#[from] LedgerError),

    #[error("Signing failed: {0}")]
    Signing(#[from] CryptoError),

    #[error("Invalid block range {start}..={end}")]
    InvalidRange { start: u64, end: u64 },
}

/// Sender nonce, read from the ledger once and tracked locally afterwards.
///
/// Assumes it is the account's only sender.
#[derive(Debug, Clone)]
pub struct NonceSequencer {
    account: Address,
    next: Option<u64>,
}

impl NonceSequencer {
    pub fn new(account: Address) -> Self {
        Self { account, next: None }
    }

    /// Nonce for the next transaction
    pub async fn current(&mut self, ledger: &dyn Ledger) -> Result<u64, LedgerError> {
        match self.next {
            Some(nonce) => Ok(nonce),
            None => {
                let nonce = ledger.pending_nonce(self.account).await?;
                debug!("Initial nonce for {}: {}", self.account, nonce);
                self.next = Some(nonce);
                Ok(nonce)
            }
        }
    }

    /// Mark the current nonce as used
    pub fn advance(&mut self) {
        if let Some(nonce) = self.next.as_mut() {
            *nonce += 1;
        }
    }

    pub fn peek(&self) -> Option<u64> {
        self.next
    }
}

/// Gas pricing: suggested price plus a fixed surcharge, estimate plus 5%.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPolicy {
    pub price_surcharge: u128,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            price_surcharge: DEFAULT_GAS_SURCHARGE,
        }
    }
}

impl GasPolicy {
    pub fn price(&self, suggested: u128) -> u128 {
        suggested.saturating_add(self.price_surcharge)
    }

    pub fn limit(&self, estimate: u64) -> u64 {
        estimate.saturating_add(estimate / 20)
    }
}

/// Signs and sends output batches and the registration transaction.
#[derive(Debug)]
pub struct Submitter {
    account: Address,
    registry: Address,
    signer: EnclaveSigner,
    nonce: NonceSequencer,
    gas: GasPolicy,
}

impl Submitter {
    pub fn new(account: Address, registry: Address, signer: EnclaveSigner, gas: GasPolicy) -> Self {
        Self {
            account,
            registry,
            signer,
            nonce: NonceSequencer::new(account),
            gas,
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn nonce(&self) -> &NonceSequencer {
        &self.nonce
    }

    /// Sign and send the outputs of blocks `start + 1 ..= end`.
    pub async fn submit(
        &mut self,
        ledger: &dyn Ledger,
        start: u64,
        end: u64,
        outputs: &[Output],
    ) -> Result<B256, SubmitError> {
        if end <= start {
            return Err(SubmitError::InvalidRange { start, end });
        }
        let start_block = ledger.block(start).await?;
        let end_block = ledger.block(end).await?;

        let digest = ledger.hash_outputs(&start_block, &end_block, outputs).await?;
        let signature = self.signer.sign_digest(&digest)?;

        let call = IManagement::outputCall {
            startBlock: abi::BlockInfo::from(&start_block),
            endBlock: abi::BlockInfo::from(&end_block),
            outputs: abi::output_records(outputs),
            signature: Bytes::copy_from_slice(&signature),
        };
        let hash = self.send(ledger, call.abi_encode(), U256::ZERO).await?;
        info!(
            "Submitted {} output(s) for blocks {}..={} in {}",
            outputs.len(),
            start + 1,
            end,
            hash
        );
        Ok(hash)
    }

    /// Register the enclave signing key with its attestation and stake.
    pub async fn register(
        &mut self,
        ledger: &dyn Ledger,
        attestation: &[u8],
        stake: U256,
    ) -> Result<B256, SubmitError> {
        let call = IManagement::registerCall {
            attestation: Bytes::copy_from_slice(attestation),
            key: Bytes::copy_from_slice(&self.signer.public_key()),
        };
        let hash = self.send(ledger, call.abi_encode(), stake).await?;
        info!("Registered enclave {} from {} in {}", self.signer.address(), self.account, hash);
        Ok(hash)
    }

    async fn send(&mut self, ledger: &dyn Ledger, input: Vec<u8>, value: U256) -> Result<B256, SubmitError> {
        let nonce = self.nonce.current(ledger).await?;
        let gas_price = self.gas.price(ledger.gas_price().await?);
        let mut tx = TransactionRequest {
            from: self.account,
            to: self.registry,
            nonce,
            gas_price,
            gas_limit: 0,
            value,
            input: Bytes::from(input),
        };
        tx.gas_limit = self.gas.limit(ledger.estimate_gas(&tx).await?);
        debug!(
            "Sending tx nonce {} gas {} @ {} ({} bytes)",
            nonce,
            tx.gas_limit,
            tx.gas_price,
            tx.input.len()
        );

        let hash = ledger.send_transaction(tx).await?;
        self.nonce.advance();
        Ok(hash)
    }
}
