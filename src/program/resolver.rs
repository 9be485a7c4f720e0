//! Program resolution through the round cache.
//!
//! On a cache miss the resolver reads the on-chain hash pointer, fetches the blob from the
//! off-chain store, re-hashes it against the pointer and only then decrypts. A missing blob
//! or a hash mismatch fails the operation that asked for it.

use super::{ProgramInfo, ProgramRecord, RoundCache};
use crate::backend::{BackendError, ProgramSource};
use crate::crypto::{self, CryptoError, SymmetricKey};
use crate::ledger::{Ledger, LedgerError};
use crate::store::{BlobStore, Category, StoreError};
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use log::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Ledger error: {0}")]
    Transport(#[from] LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Program {0} is not deployed")]
    NotDeployed(Address),

    #[error("Missing {category:?} blob {hash} for {address}")]
    Missing {
        address: Address,
        category: Category,
        hash: B256,
    },

    #[error("{category:?} blob for {address} does not match its on-chain hash {expected}")]
    Integrity {
        address: Address,
        category: Category,
        expected: B256,
    },

    #[error("Decryption failed: {0}")]
    Decryption(#[from] CryptoError),

    #[error("Malformed program info: {0}")]
    Codec(String),
}

pub struct Resolver<'a> {
    ledger: &'a dyn Ledger,
    store: &'a dyn BlobStore,
    cache: &'a mut RoundCache,
    management_key: &'a SymmetricKey,
}

impl<'a> Resolver<'a> {
    pub fn new(
        ledger: &'a dyn Ledger,
        store: &'a dyn BlobStore,
        cache: &'a mut RoundCache,
        management_key: &'a SymmetricKey,
    ) -> Self {
        Self {
            ledger,
            store,
            cache,
            management_key,
        }
    }

    /// Current info of `address`, from the round cache or the ledger + store
    pub async fn resolve_info(&mut self, address: Address) -> Result<ProgramInfo, ResolveError> {
        if let Some(info) = self.cache.info(&address) {
            return Ok(info.clone());
        }
        let pointer = self.ledger.info_pointer(address).await?;
        if pointer == B256::ZERO {
            return Err(ResolveError::NotDeployed(address));
        }
        let blob = self.fetch(address, Category::Info, pointer)?;
        let plain = self.management_key.decrypt(&blob)?;
        let info = ProgramInfo::from_bytes(&plain).map_err(|e| ResolveError::Codec(e.to_string()))?;
        debug!("Resolved info of {} (execution {})", address, info.execution_count);
        self.cache.set_info(address, info.clone());
        Ok(info)
    }

    /// Current code and state of `address`. Without explicit `(state_key, code_key)` the
    /// keys come from the program's info.
    pub async fn resolve_details(
        &mut self,
        address: Address,
        keys: Option<(&SymmetricKey, &SymmetricKey)>,
    ) -> Result<ProgramRecord, ResolveError> {
        if let Some(record) = self.cache.details(&address) {
            return Ok(record.clone());
        }
        let (state_key, code_key) = match keys {
            Some((state_key, code_key)) => (state_key.clone(), code_key.clone()),
            None => {
                let info = self.resolve_info(address).await?;
                let state_key = info
                    .latest_key()
                    .cloned()
                    .ok_or_else(|| ResolveError::Codec(format!("{} has no state key", address)))?;
                (state_key, info.code_key)
            }
        };

        let code_pointer = self.ledger.code_pointer(address).await?;
        let states_pointer = self.ledger.states_pointer(address).await?;
        if code_pointer == B256::ZERO {
            return Err(ResolveError::NotDeployed(address));
        }
        let code = code_key.decrypt(&self.fetch(address, Category::Code, code_pointer)?)?;
        let states = state_key.decrypt(&self.fetch(address, Category::State, states_pointer)?)?;

        let record = ProgramRecord { code, states };
        self.cache.set_details(address, record.clone());
        Ok(record)
    }

    fn fetch(&self, address: Address, category: Category, pointer: B256) -> Result<Vec<u8>, ResolveError> {
        let blob = self
            .store
            .get(address, category, &pointer)?
            .ok_or(ResolveError::Missing {
                address,
                category,
                hash: pointer,
            })?;
        if !crypto::match_hash(&blob, &pointer) {
            warn!("Tampered {:?} blob for {} (pointer {})", category, address, pointer);
            return Err(ResolveError::Integrity {
                address,
                category,
                expected: pointer,
            });
        }
        Ok(blob)
    }
}

#[async_trait]
impl<'a> ProgramSource for Resolver<'a> {
    async fn program(&mut self, address: Address) -> Result<ProgramRecord, BackendError> {
        self.resolve_details(address, None)
            .await
            .map_err(|e| BackendError::Source(Box::new(e)))
    }
}
