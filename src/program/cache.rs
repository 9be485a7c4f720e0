//! Round cache: decrypted program data shared by the events of one round.
//!
//! Later events in a round see earlier events' writes through this cache, since their
//! pointer updates are not on-chain until the batch is submitted. It is cleared
//! unconditionally at the end of every round.

use super::ProgramInfo;
use alloy_primitives::Address;
use std::collections::HashMap;

/// Decrypted code and state of one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramRecord {
    pub code: Vec<u8>,
    pub states: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct RoundCache {
    infos: HashMap<Address, ProgramInfo>,
    details: HashMap<Address, ProgramRecord>,
}

impl RoundCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self, address: &Address) -> Option<&ProgramInfo> {
        self.infos.get(address)
    }

    pub fn set_info(&mut self, address: Address, info: ProgramInfo) {
        self.infos.insert(address, info);
    }

    pub fn details(&self, address: &Address) -> Option<&ProgramRecord> {
        self.details.get(address)
    }

    pub fn set_details(&mut self, address: Address, record: ProgramRecord) {
        self.details.insert(address, record);
    }

    pub fn clear(&mut self) {
        self.infos.clear();
        self.details.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty() && self.details.is_empty()
    }
}
