//! Execution backends
//!
//! Two runtimes sit behind one Deploy/Execute contract, chosen once at construction:
//! - **Bytecode**: a fresh contract machine per call, with the interact graph rehydrated
//!   through the `getStates` / `setStates` / `getInteractContracts` accessors
//! - **Interpreted**: sandboxed source programs exposing `GetStates` / `SetStates`
//!
//! Backend failures are ordinary per-event errors.

pub mod bytecode;
pub mod evm;
pub mod interpreted;

pub use bytecode::{BytecodeBackend, ContractMachine, MachineFactory};
pub use evm::RevmFactory;
pub use interpreted::InterpretedBackend;

use crate::program::ProgramRecord;
use alloy_primitives::Address;
use async_trait::async_trait;
use interpreted::InterpretError;

/// Lowest block number handed to a runtime; earlier numbers are clamped up to it.
pub const DEFAULT_MIN_BLOCK_NUMBER: u64 = 12_965_000;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Interpreter error: {0}")]
    Interpreted(#[from] InterpretError),

    #[error("Machine error: {0}")]
    Machine(String),

    #[error("ABI error: {0}")]
    Abi(String),

    /// Failure while loading a sub-program; carries the loader's own error
    #[error("{0}")]
    Source(Box<dyn std::error::Error + Send + Sync>),
}

/// Call environment seen by a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    pub program_address: Address,
    pub caller: Address,
    pub block_number: u64,
    pub block_time: u64,
}

impl ExecutionContext {
    /// Build a context, clamping the block number to `min_block_number`
    pub fn new(
        program_address: Address,
        caller: Address,
        block_number: u64,
        block_time: u64,
        min_block_number: u64,
    ) -> Self {
        Self {
            program_address,
            caller,
            block_number: block_number.max(min_block_number),
            block_time,
        }
    }
}

/// Result of a deploy: initial state and the code to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub state: Vec<u8>,
    pub code: Vec<u8>,
}

/// Post-call snapshot of one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchedProgram {
    pub address: Address,
    pub state: Vec<u8>,
    pub code: Vec<u8>,
}

/// Value returned by a call, before encoding for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum CallResult {
    Nil,
    Bytes(Vec<u8>),
    Text(String),
    Integer(i64),
    Bool(bool),
    Structured(interpreted::Value),
}

/// Result of an execute. `touched` lists each affected program once, primary first.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub touched: Vec<TouchedProgram>,
    pub result: CallResult,
}

/// Loads decrypted code and state of programs other than the call target.
#[async_trait]
pub trait ProgramSource: Send {
    async fn program(&mut self, address: Address) -> Result<ProgramRecord, BackendError>;
}

/// The configured runtime.
pub enum ExecutionBackend {
    Bytecode(BytecodeBackend),
    Interpreted(InterpretedBackend),
}

impl ExecutionBackend {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionBackend::Bytecode(_) => "bytecode",
            ExecutionBackend::Interpreted(_) => "interpreted",
        }
    }

    pub fn deploy(&self, code: &[u8], ctx: &ExecutionContext) -> Result<Deployment, BackendError> {
        match self {
            ExecutionBackend::Bytecode(backend) => backend.deploy(code, ctx),
            ExecutionBackend::Interpreted(backend) => backend.deploy(code),
        }
    }

    /// Run `input` against `target` (the decrypted primary program).
    pub async fn execute(
        &self,
        target: &ProgramRecord,
        input: &[u8],
        ctx: &ExecutionContext,
        source: &mut dyn ProgramSource,
    ) -> Result<Execution, BackendError> {
        match self {
            ExecutionBackend::Bytecode(backend) => backend.execute(target, input, ctx, source).await,
            ExecutionBackend::Interpreted(backend) => {
                backend.execute(&target.code, &target.states, input, ctx)
            }
        }
    }
}

impl std::fmt::Debug for ExecutionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExecutionBackend({})", self.name())
    }
}
