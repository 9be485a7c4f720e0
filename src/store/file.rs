//! File-backed off-chain store
//!
//! Layout: `<root>/<address>/<category>/<hash>.bin`. Existing files are never rewritten.

use super::{BlobStore, Category, StoreError};
use alloy_primitives::{Address, B256};
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Blob store persisted on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        info!("Opened off-chain store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, address: Address, category: Category) -> PathBuf {
        self.root
            .join(hex::encode(address.as_slice()))
            .join(category.name())
    }

    fn blob_path(&self, address: Address, category: Category, hash: &B256) -> PathBuf {
        self.dir(address, category)
            .join(format!("{}.bin", hex::encode(hash.as_slice())))
    }
}

impl BlobStore for FileStore {
    fn put(
        &self,
        address: Address,
        category: Category,
        hash: B256,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let dir = self.dir(address, category);
        std::fs::create_dir_all(&dir)?;

        let path = self.blob_path(address, category, &hash);
        if path.exists() {
            debug!("{:?} blob {} for {} already stored", category, hash, address);
            return Ok(());
        }
        std::fs::write(&path, bytes)?;
        Ok(())
    }

    fn get(
        &self,
        address: Address,
        category: Category,
        hash: &B256,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.blob_path(address, category, hash);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
