//! Round driver
//!
//! The executor owns the processor and the submitter and runs one round at a time:
//! 1. read the registry's last processed block
//! 2. fetch events of the following blocks up to the notified head
//! 3. process them into outputs
//! 4. sign and submit the batch
//!
//! A failed round publishes nothing. The registry's pointer does not move, so the next
//! notification re-drives the same range.

use crate::attestation;
use crate::backend::{BytecodeBackend, ExecutionBackend, InterpretedBackend, MachineFactory, RevmFactory};
use crate::config::{BackendKind, ConfigError, ExecutorConfig};
use crate::crypto::{CryptoError, EnclaveKeys};
use crate::ledger::{Ledger, LedgerError};
use crate::process::{ProcessError, Processor};
use crate::store::{BlobStore, FileStore, MemoryStore, StoreError};
use crate::submit::{GasPolicy, SubmitError, Submitter};
use alloy_primitives::{B256, U256};
use log::{error, info};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Processing failed: {0}")]
    Process(#[from] ProcessError),

    #[error("Submission failed: {0}")]
    Submit(#[from] SubmitError),

    #[error("Ledger error: {0}")]
    Transport(#[from] LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Attestation encoding failed: {0}")]
    Attestation(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Key material error: {0}")]
    Keys(#[from] CryptoError),
}

/// What one round did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    /// Last processed block before the round
    pub start: u64,
    pub end: u64,
    pub events: usize,
    pub outputs: usize,
    /// Output transaction, if anything was submitted
    pub transaction: Option<B256>,
}

pub struct Executor {
    ledger: Arc<dyn Ledger>,
    keys: Arc<EnclaveKeys>,
    processor: Processor,
    submitter: Submitter,
    stake: U256,
}

impl Executor {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        keys: Arc<EnclaveKeys>,
        processor: Processor,
        submitter: Submitter,
        stake: U256,
    ) -> Self {
        Self {
            ledger,
            keys,
            processor,
            submitter,
            stake,
        }
    }

    /// Assemble an executor from configuration. The bytecode backend runs on revm unless
    /// `machines` supplies another contract machine; the interpreted backend ignores it.
    pub fn from_config(
        config: &ExecutorConfig,
        ledger: Arc<dyn Ledger>,
        keys: Arc<EnclaveKeys>,
        machines: Option<Box<dyn MachineFactory>>,
    ) -> Result<Self, ExecutorError> {
        let backend = match config.backend {
            BackendKind::Interpreted => ExecutionBackend::Interpreted(InterpretedBackend::new(config.fuel)),
            BackendKind::Bytecode => ExecutionBackend::Bytecode(BytecodeBackend::new(
                machines.unwrap_or_else(|| Box::new(RevmFactory::default())),
            )),
        };
        let store: Arc<dyn BlobStore> = match &config.store_dir {
            Some(dir) => Arc::new(FileStore::open(dir)?),
            None => Arc::new(MemoryStore::new()),
        };
        info!(
            "Executor for enclave {} using the {} backend",
            keys.signer.address(),
            backend.name()
        );

        let processor = Processor::new(store, backend, keys.clone(), config.min_block_number);
        let submitter = Submitter::new(
            config.sender,
            config.registry,
            keys.signer.clone(),
            GasPolicy {
                price_surcharge: config.gas_price_surcharge,
            },
        );
        Ok(Self::new(ledger, keys, processor, submitter, config.stake))
    }

    /// Start from a config file: load it, load the key file it names (creating one on first
    /// start), and assemble the executor over `ledger`.
    pub fn open(config_path: impl AsRef<Path>, ledger: Arc<dyn Ledger>) -> Result<Self, ExecutorError> {
        let config = ExecutorConfig::load(config_path)?;
        let keys = Arc::new(EnclaveKeys::load_or_generate(&config.key_path)?);
        Self::from_config(&config, ledger, keys, None)
    }

    pub fn keys(&self) -> &Arc<EnclaveKeys> {
        &self.keys
    }

    /// Register the enclave key unless the registry already holds it.
    pub async fn register(&mut self) -> Result<Option<B256>, ExecutorError> {
        let public_key = self.keys.signer.public_key();
        let account = self.submitter.account();
        if let Some(existing) = self.ledger.enclave_registration(account).await? {
            if existing.public_key[..] == public_key[..] {
                info!("Enclave {} already registered", self.keys.signer.address());
                return Ok(None);
            }
        }

        let nonce = uuid::Uuid::new_v4().to_string();
        let quote = attestation::generate_quote(&self.keys.signer, &nonce)
            .to_bytes()
            .map_err(|e| ExecutorError::Attestation(e.to_string()))?;
        let hash = self
            .submitter
            .register(self.ledger.as_ref(), &quote, self.stake)
            .await?;
        Ok(Some(hash))
    }

    /// Process and submit everything after the last processed block up to `head`.
    pub async fn run_round(&mut self, head: u64) -> Result<RoundReport, ExecutorError> {
        let ledger = self.ledger.as_ref();
        let start = ledger.latest_processed_block().await?;
        let mut report = RoundReport {
            start,
            end: head,
            events: 0,
            outputs: 0,
            transaction: None,
        };
        if head <= start {
            return Ok(report);
        }

        let events = ledger.events(start + 1, head).await?;
        report.events = events.len();
        if events.is_empty() {
            info!("Blocks {}..={}: no events", start + 1, head);
            return Ok(report);
        }

        let outputs = self.processor.process(ledger, &events).await?;
        report.outputs = outputs.len();
        info!(
            "Blocks {}..={}: {} event(s) -> {} output(s)",
            start + 1,
            head,
            events.len(),
            outputs.len()
        );
        report.transaction = Some(self.submitter.submit(ledger, start, head, &outputs).await?);
        Ok(report)
    }

    /// Run rounds for each notified head, one at a time, until the channel closes.
    pub async fn run(mut self, mut heads: mpsc::Receiver<u64>) {
        while let Some(head) = heads.recv().await {
            if let Err(e) = self.run_round(head).await {
                error!("Round up to block {} failed: {}", head, e);
            }
        }
        info!("Block notifications closed, executor stopping");
    }
}
