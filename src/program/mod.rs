//! Program metadata and its per-round resolution
//!
//! - **ProgramInfo**: keys, access list and rotation policy of one program
//! - **RoundCache**: decrypted info/code/state for the duration of one round
//! - **Resolver**: pointer → blob → hash check → decrypt, through the round cache

pub mod cache;
pub mod resolver;

pub use cache::{ProgramRecord, RoundCache};
pub use resolver::Resolver;

use crate::crypto::SymmetricKey;
use alloy_primitives::Address;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Deployer-chosen policy, carried encrypted in the Deploy event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    /// Permitted callers; empty means public
    pub acl: Vec<Address>,
    /// Rotate the state key every N executions (0 = never)
    pub key_rotation: u64,
    /// On rotation, replace the key instead of appending to the history
    pub history_key_discard: bool,
}

impl ProgramConfig {
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Per-program policy and key metadata, stored encrypted under the management key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramInfo {
    /// State keys, newest last
    pub keys: Vec<SymmetricKey>,
    pub code_key: SymmetricKey,
    pub history_key_discard: bool,
    pub key_rotation: u64,
    pub acl: BTreeSet<Address>,
    pub execution_count: u64,
    /// Redrawn on every update so consecutive info ciphertexts are never correlated
    pub nonce: u64,
}

impl ProgramInfo {
    /// Fresh info for a newly deployed program
    pub fn new(config: &ProgramConfig, state_key: SymmetricKey, code_key: SymmetricKey) -> Self {
        Self {
            keys: vec![state_key],
            code_key,
            history_key_discard: config.history_key_discard,
            key_rotation: config.key_rotation,
            acl: config.acl.iter().copied().collect(),
            execution_count: 0,
            nonce: rand::thread_rng().gen(),
        }
    }

    /// Whether `caller` may execute this program
    pub fn permits(&self, caller: &Address) -> bool {
        self.acl.is_empty() || self.acl.contains(caller)
    }

    /// Key the current state is encrypted under
    pub fn latest_key(&self) -> Option<&SymmetricKey> {
        self.keys.last()
    }

    /// Account for one execution: bump the counter, redraw the nonce and rotate the state
    /// key when the rotation period is reached. Returns true if the key rotated.
    pub fn record_execution(&mut self) -> bool {
        self.execution_count += 1;
        self.nonce = rand::thread_rng().gen();

        if self.key_rotation == 0 || self.execution_count % self.key_rotation != 0 {
            return false;
        }
        let fresh = SymmetricKey::generate();
        if self.history_key_discard {
            self.keys = vec![fresh];
        } else {
            self.keys.push(fresh);
        }
        true
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(rotation: u64, discard: bool) -> ProgramInfo {
        let config = ProgramConfig {
            acl: Vec::new(),
            key_rotation: rotation,
            history_key_discard: discard,
        };
        ProgramInfo::new(&config, SymmetricKey::generate(), SymmetricKey::generate())
    }

    #[test]
    fn test_rotation_appends_history() {
        let mut info = info(3, false);
        assert!(!info.record_execution());
        assert!(!info.record_execution());
        assert_eq!(info.keys.len(), 1);
        assert!(info.record_execution());
        assert_eq!(info.keys.len(), 2);
        assert_eq!(info.execution_count, 3);
    }

    #[test]
    fn test_rotation_discards_history() {
        let mut info = info(3, true);
        let original = info.keys[0].clone();
        for _ in 0..3 {
            info.record_execution();
        }
        assert_eq!(info.keys.len(), 1);
        assert_ne!(info.keys[0], original);
    }

    #[test]
    fn test_no_rotation() {
        let mut info = info(0, false);
        for _ in 0..10 {
            assert!(!info.record_execution());
        }
        assert_eq!(info.keys.len(), 1);
        assert_eq!(info.execution_count, 10);
    }

    #[test]
    fn test_acl() {
        let a = Address::repeat_byte(0xA);
        let b = Address::repeat_byte(0xB);
        let c = Address::repeat_byte(0xC);

        let public = info(0, false);
        assert!(public.permits(&c));

        let config = ProgramConfig {
            acl: vec![a, b],
            ..Default::default()
        };
        let private = ProgramInfo::new(&config, SymmetricKey::generate(), SymmetricKey::generate());
        assert!(private.permits(&a));
        assert!(private.permits(&b));
        assert!(!private.permits(&c));
    }

    #[test]
    fn test_info_bytes_roundtrip() {
        let mut info = info(2, false);
        info.record_execution();
        let restored = ProgramInfo::from_bytes(&info.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, info);
    }

    #[test]
    fn test_config_defaults() {
        let config = ProgramConfig::from_json(b"{}").unwrap();
        assert_eq!(config, ProgramConfig::default());
        let config = ProgramConfig::from_json(br#"{"key_rotation": 200, "history_key_discard": true}"#)
            .unwrap();
        assert_eq!(config.key_rotation, 200);
        assert!(config.history_key_discard);
    }
}
