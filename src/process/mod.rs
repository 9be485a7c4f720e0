//! Event processing
//!
//! One call to [`Processor::process`] handles one block range:
//! - each event is dispatched to the Deploy or Execute handler, in chain order
//! - per-event failures become a single `Error` output and the round moves on
//! - ledger transport failures abort the round
//!
//! The round cache is emptied when `process` returns, whatever the outcome.

pub mod deploy;
pub mod encode;
pub mod execute;

use crate::backend::{BackendError, ExecutionBackend, ExecutionContext};
use crate::crypto::{CryptoError, EnclaveKeys};
use crate::ledger::{Ledger, LedgerError};
use crate::program::resolver::ResolveError;
use crate::program::RoundCache;
use crate::store::{BlobStore, StoreError};
use crate::types::{Event, EventPayload, Output};
use log::{debug, info, warn};
use std::sync::Arc;

/// Message carried by the Error output of an unauthorised call.
pub const ACL_DENIED: &str = "Caller is not in ACL";

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Decryption failed: {0}")]
    Decryption(#[from] CryptoError),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Execution failed: {0}")]
    Execution(BackendError),

    #[error("{0}")]
    Authorization(String),

    #[error("Ledger error: {0}")]
    Transport(#[from] LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(String),
}

impl ProcessError {
    /// Whether the failure aborts the whole round instead of a single event
    pub fn is_round_fatal(&self) -> bool {
        matches!(self, ProcessError::Transport(_))
    }

    /// Text published in the Error output. The detailed cause can name program internals,
    /// so it only goes to the enclave log.
    pub fn public_message(&self) -> &'static str {
        match self {
            ProcessError::Decryption(_) => "Decryption failed",
            ProcessError::Integrity(_) => "Integrity check failed",
            ProcessError::Execution(_) => "Execution failed",
            ProcessError::Authorization(_) => ACL_DENIED,
            ProcessError::Transport(_) => "Ledger error",
            ProcessError::Store(_) => "Store error",
            ProcessError::Codec(_) => "Malformed payload",
        }
    }
}

impl From<ResolveError> for ProcessError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Transport(e) => ProcessError::Transport(e),
            ResolveError::Store(e) => ProcessError::Store(e),
            ResolveError::Decryption(e) => ProcessError::Decryption(e),
            ResolveError::Codec(msg) => ProcessError::Codec(msg),
            e @ (ResolveError::NotDeployed(_)
            | ResolveError::Missing { .. }
            | ResolveError::Integrity { .. }) => ProcessError::Integrity(e.to_string()),
        }
    }
}

impl From<BackendError> for ProcessError {
    fn from(err: BackendError) -> Self {
        match err {
            // a sub-program load failure keeps its own classification
            BackendError::Source(source) => match source.downcast::<ResolveError>() {
                Ok(resolve) => ProcessError::from(*resolve),
                Err(other) => ProcessError::Execution(BackendError::Source(other)),
            },
            other => ProcessError::Execution(other),
        }
    }
}

/// Deploy/Execute state machine over one round of events.
pub struct Processor {
    store: Arc<dyn BlobStore>,
    backend: ExecutionBackend,
    keys: Arc<EnclaveKeys>,
    cache: RoundCache,
    min_block_number: u64,
}

impl Processor {
    pub fn new(
        store: Arc<dyn BlobStore>,
        backend: ExecutionBackend,
        keys: Arc<EnclaveKeys>,
        min_block_number: u64,
    ) -> Self {
        Self {
            store,
            backend,
            keys,
            cache: RoundCache::new(),
            min_block_number,
        }
    }

    pub fn backend(&self) -> &ExecutionBackend {
        &self.backend
    }

    pub fn cache(&self) -> &RoundCache {
        &self.cache
    }

    /// Process `events` in order and return their outputs in the same order.
    pub async fn process(
        &mut self,
        ledger: &dyn Ledger,
        events: &[Event],
    ) -> Result<Vec<Output>, ProcessError> {
        let result = self.process_events(ledger, events).await;
        self.cache.clear();
        result
    }

    async fn process_events(
        &mut self,
        ledger: &dyn Ledger,
        events: &[Event],
    ) -> Result<Vec<Output>, ProcessError> {
        let mut outputs = Vec::new();
        for event in events {
            debug!(
                "{} event for {} from {} (block {}, log {})",
                event.kind(),
                event.program_address,
                event.caller,
                event.block_number,
                event.log_index
            );
            match self.handle(ledger, event).await {
                Ok(produced) => {
                    info!(
                        "{} on {}: {} output(s)",
                        event.kind(),
                        event.program_address,
                        produced.len()
                    );
                    outputs.extend(produced);
                }
                Err(e) if e.is_round_fatal() => {
                    warn!("Aborting round at {} event for {}: {}", event.kind(), event.program_address, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("{} on {} failed: {}", event.kind(), event.program_address, e);
                    outputs.push(Output::error(
                        event.program_address,
                        e.public_message(),
                        event.encrypted_result_key(),
                    ));
                }
            }
        }
        Ok(outputs)
    }

    async fn handle(&mut self, ledger: &dyn Ledger, event: &Event) -> Result<Vec<Output>, ProcessError> {
        match &event.payload {
            EventPayload::Deploy {
                encrypted_code,
                encrypted_config,
            } => Ok(vec![self.deploy(event, encrypted_code, encrypted_config)?]),
            EventPayload::Execution {
                encrypted_input,
                encrypted_result_key,
            } => {
                self.execute(ledger, event, encrypted_input, encrypted_result_key)
                    .await
            }
        }
    }

    fn context(&self, event: &Event) -> ExecutionContext {
        ExecutionContext::new(
            event.program_address,
            event.caller,
            event.block_number,
            event.block_time,
            self.min_block_number,
        )
    }
}
