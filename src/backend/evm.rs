//! EVM contract machines backed by revm.
//!
//! Each spawned machine owns a private in-memory database, so a call sees only the code and
//! storage the backend installs for it. Block number and timestamp come from the
//! execution context. Gas is free but bounded per message call.

use super::bytecode::{ContractMachine, MachineFactory};
use super::{BackendError, ExecutionContext};
use alloy_primitives::{Address, Bytes, U256};
use log::debug;
use revm::db::InMemoryDB;
use revm::primitives::{AccountInfo, Bytecode, ExecutionResult, Output, TxKind};
use revm::Evm;

/// Gas available to each message call
pub const DEFAULT_CALL_GAS: u64 = 30_000_000;

pub struct RevmMachine {
    db: InMemoryDB,
    block_number: u64,
    block_time: u64,
    gas_limit: u64,
}

impl RevmMachine {
    pub fn new(ctx: &ExecutionContext, gas_limit: u64) -> Self {
        Self {
            db: InMemoryDB::default(),
            block_number: ctx.block_number,
            block_time: ctx.block_time,
            gas_limit,
        }
    }

    fn transact(&mut self, caller: Address, kind: TxKind, input: &[u8]) -> Result<Output, BackendError> {
        let (number, timestamp, gas_limit) = (self.block_number, self.block_time, self.gas_limit);
        let mut evm = Evm::builder()
            .with_db(&mut self.db)
            .modify_block_env(|block| {
                block.number = U256::from(number);
                block.timestamp = U256::from(timestamp);
            })
            .modify_tx_env(|tx| {
                tx.caller = caller;
                tx.transact_to = kind;
                tx.data = Bytes::copy_from_slice(input);
                tx.value = U256::ZERO;
                tx.gas_limit = gas_limit;
                tx.gas_price = U256::ZERO;
            })
            .build();
        let result = evm
            .transact_commit()
            .map_err(|e| BackendError::Machine(e.to_string()))?;

        match result {
            ExecutionResult::Success { output, gas_used, .. } => {
                debug!("EVM call used {} gas", gas_used);
                Ok(output)
            }
            ExecutionResult::Revert { output, .. } => Err(BackendError::Machine(format!(
                "reverted: 0x{}",
                hex::encode(output)
            ))),
            ExecutionResult::Halt { reason, .. } => {
                Err(BackendError::Machine(format!("halted: {:?}", reason)))
            }
        }
    }
}

impl ContractMachine for RevmMachine {
    fn create(&mut self, caller: Address, address: Address, init_code: &[u8]) -> Result<Vec<u8>, BackendError> {
        let created = match self.transact(caller, TxKind::Create, init_code)? {
            Output::Create(_, Some(created)) => created,
            other => {
                return Err(BackendError::Machine(format!(
                    "create returned no address ({} bytes)",
                    other.data().len()
                )))
            }
        };

        // constructor storage moves along with the code to the program's own address
        let account = self
            .db
            .accounts
            .remove(&created)
            .ok_or_else(|| BackendError::Machine(format!("created account {} is missing", created)))?;
        let runtime = account
            .info
            .code
            .as_ref()
            .map(|code| code.original_bytes().to_vec())
            .unwrap_or_default();
        self.db.accounts.insert(address, account);
        Ok(runtime)
    }

    fn install(&mut self, address: Address, code: &[u8]) -> Result<(), BackendError> {
        let bytecode = Bytecode::new_raw_checked(Bytes::copy_from_slice(code))
            .map_err(|e| BackendError::Machine(format!("invalid code at {}: {:?}", address, e)))?;
        self.db.insert_account_info(
            address,
            AccountInfo {
                balance: U256::ZERO,
                nonce: 1,
                code_hash: bytecode.hash_slow(),
                code: Some(bytecode),
            },
        );
        Ok(())
    }

    fn call(&mut self, caller: Address, target: Address, input: &[u8]) -> Result<Vec<u8>, BackendError> {
        let output = self
            .transact(caller, TxKind::Call(target), input)
            .map_err(|e| match e {
                BackendError::Machine(msg) => BackendError::Machine(format!("{}: {}", target, msg)),
                other => other,
            })?;
        Ok(output.into_data().to_vec())
    }
}

/// Spawns a fresh [`RevmMachine`] per call.
#[derive(Debug, Clone, Copy)]
pub struct RevmFactory {
    pub gas_limit: u64,
}

impl Default for RevmFactory {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_CALL_GAS,
        }
    }
}

impl MachineFactory for RevmFactory {
    fn spawn(&self, ctx: &ExecutionContext) -> Box<dyn ContractMachine> {
        Box::new(RevmMachine::new(ctx, self.gas_limit))
    }
}
