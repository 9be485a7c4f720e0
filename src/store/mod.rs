//! Off-chain store: untrusted blob storage addressed by content hash
//!
//! Blobs are keyed by `(program address, category, hash)` and are write-once: a second put
//! under an existing key keeps the stored bytes. Every state and info version is kept,
//! nothing is pruned. A program's code never changes because its on-chain code pointer is
//! only set by its Deploy; an unpublished code blob left by an aborted round is inert.
//!
//! The store never checks that a hash matches its blob. Readers re-hash everything they
//! fetch against the on-chain pointer before decrypting.

pub mod file;

pub use file::FileStore;

use alloy_primitives::{Address, B256};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Blob category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Code,
    State,
    Info,
}

impl Category {
    pub fn name(&self) -> &'static str {
        match self {
            Category::Code => "code",
            Category::State => "state",
            Category::Info => "info",
        }
    }
}

/// Store-related errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Keyed blob store shared by every round of the process.
pub trait BlobStore: Send + Sync {
    /// Persist `bytes` under `(address, category, hash)`; an existing blob is kept.
    fn put(&self, address: Address, category: Category, hash: B256, bytes: &[u8])
        -> Result<(), StoreError>;

    /// Fetch an independent copy of a blob; `None` if nothing is stored under the key.
    fn get(&self, address: Address, category: Category, hash: &B256)
        -> Result<Option<Vec<u8>>, StoreError>;
}

type Blobs = HashMap<Category, HashMap<B256, Vec<u8>>>;

/// In-memory blob store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    programs: RwLock<HashMap<Address, Blobs>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored versions for one address and category
    pub fn versions(&self, address: Address, category: Category) -> usize {
        let Ok(programs) = self.programs.read() else {
            return 0;
        };
        programs
            .get(&address)
            .and_then(|blobs| blobs.get(&category))
            .map_or(0, HashMap::len)
    }

    /// Overwrite a stored blob in place, bypassing every rule. Test helper for tamper checks.
    pub fn corrupt(&self, address: Address, category: Category, hash: &B256, bytes: Vec<u8>) {
        if let Ok(mut programs) = self.programs.write() {
            programs
                .entry(address)
                .or_default()
                .entry(category)
                .or_default()
                .insert(*hash, bytes);
        }
    }
}

impl BlobStore for MemoryStore {
    fn put(
        &self,
        address: Address,
        category: Category,
        hash: B256,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let mut programs = self.programs.write().map_err(|_| StoreError::Poisoned)?;
        let blobs = programs.entry(address).or_default().entry(category).or_default();
        if blobs.contains_key(&hash) {
            debug!("{:?} blob {} for {} already stored", category, hash, address);
        } else {
            blobs.insert(hash, bytes.to_vec());
        }
        Ok(())
    }

    fn get(
        &self,
        address: Address,
        category: Category,
        hash: &B256,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let programs = self.programs.read().map_err(|_| StoreError::Poisoned)?;
        Ok(programs
            .get(&address)
            .and_then(|blobs| blobs.get(&category))
            .and_then(|blobs| blobs.get(hash))
            .cloned())
    }
}
