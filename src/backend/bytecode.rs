//! Bytecode backend: isolated contract machines
//!
//! Every deploy and execute spawns a fresh [`ContractMachine`], so nothing leaks between
//! calls. Programs must expose the standard accessors of [`IStandardProgram`]:
//! - `getStates()` snapshots the program's storage as bytes
//! - `setStates(bytes)` restores it
//! - `getInteractContracts()` lists the sub-programs a call may touch
//!
//! Execute walks the interact graph depth-first from the target, rehydrating each program
//! once. A visited set keeps shared and cyclic references from being loaded or reported twice.

use super::{
    BackendError, CallResult, Deployment, Execution, ExecutionContext, ProgramSource,
    TouchedProgram,
};
use crate::program::ProgramRecord;
use alloy_primitives::{Address, Bytes};
use alloy_sol_types::{sol, SolCall};
use log::debug;
use std::collections::HashSet;

sol! {
    interface IStandardProgram {
        function getStates() external view returns (bytes states);
        function setStates(bytes states) external;
        function getInteractContracts() external view returns (address[] contracts);
    }
}

/// A single-use contract execution environment.
pub trait ContractMachine: Send {
    /// Run `init_code` as `caller` and install the resulting runtime code at `address`.
    /// Returns the runtime code.
    fn create(&mut self, caller: Address, address: Address, init_code: &[u8])
        -> Result<Vec<u8>, BackendError>;

    /// Install runtime code at `address` with empty storage
    fn install(&mut self, address: Address, code: &[u8]) -> Result<(), BackendError>;

    /// Message call; returns the raw return data
    fn call(&mut self, caller: Address, target: Address, input: &[u8])
        -> Result<Vec<u8>, BackendError>;
}

/// Produces a fresh machine for each call.
pub trait MachineFactory: Send + Sync {
    fn spawn(&self, ctx: &ExecutionContext) -> Box<dyn ContractMachine>;
}

pub struct BytecodeBackend {
    factory: Box<dyn MachineFactory>,
}

impl BytecodeBackend {
    pub fn new(factory: Box<dyn MachineFactory>) -> Self {
        Self { factory }
    }

    /// Create the contract and read back its initial storage.
    pub fn deploy(&self, code: &[u8], ctx: &ExecutionContext) -> Result<Deployment, BackendError> {
        let mut machine = self.factory.spawn(ctx);
        let runtime = machine.create(ctx.caller, ctx.program_address, code)?;
        let state = get_states(machine.as_mut(), ctx.caller, ctx.program_address)?;
        Ok(Deployment {
            state,
            code: runtime,
        })
    }

    pub async fn execute(
        &self,
        target: &ProgramRecord,
        input: &[u8],
        ctx: &ExecutionContext,
        source: &mut dyn ProgramSource,
    ) -> Result<Execution, BackendError> {
        let mut machine = self.factory.spawn(ctx);

        let mut visited = HashSet::new();
        let mut order: Vec<(Address, Vec<u8>)> = Vec::new();
        let mut stack = vec![ctx.program_address];
        while let Some(address) = stack.pop() {
            if !visited.insert(address) {
                continue;
            }
            let record = if address == ctx.program_address {
                target.clone()
            } else {
                source.program(address).await?
            };
            machine.install(address, &record.code)?;
            set_states(machine.as_mut(), ctx.caller, address, &record.states)?;
            let children = interact_contracts(machine.as_mut(), ctx.caller, address)?;
            debug!("{} declares {} interact contracts", address, children.len());

            // reversed so the first declared child is visited next
            for child in children.into_iter().rev() {
                if !visited.contains(&child) {
                    stack.push(child);
                }
            }
            order.push((address, record.code));
        }

        let output = machine.call(ctx.caller, ctx.program_address, input)?;

        let mut touched = Vec::with_capacity(order.len());
        for (address, code) in order {
            let state = get_states(machine.as_mut(), ctx.caller, address)?;
            touched.push(TouchedProgram {
                address,
                state,
                code,
            });
        }
        Ok(Execution {
            touched,
            result: CallResult::Bytes(output),
        })
    }
}

fn get_states(
    machine: &mut dyn ContractMachine,
    caller: Address,
    address: Address,
) -> Result<Vec<u8>, BackendError> {
    let data = IStandardProgram::getStatesCall {}.abi_encode();
    let out = machine.call(caller, address, &data)?;
    let decoded = IStandardProgram::getStatesCall::abi_decode_returns(&out, true)
        .map_err(|e| BackendError::Abi(format!("getStates of {}: {}", address, e)))?;
    Ok(decoded.states.to_vec())
}

fn set_states(
    machine: &mut dyn ContractMachine,
    caller: Address,
    address: Address,
    state: &[u8],
) -> Result<(), BackendError> {
    let data = IStandardProgram::setStatesCall {
        states: Bytes::copy_from_slice(state),
    }
    .abi_encode();
    machine.call(caller, address, &data)?;
    Ok(())
}

fn interact_contracts(
    machine: &mut dyn ContractMachine,
    caller: Address,
    address: Address,
) -> Result<Vec<Address>, BackendError> {
    let data = IStandardProgram::getInteractContractsCall {}.abi_encode();
    let out = machine.call(caller, address, &data)?;
    let decoded = IStandardProgram::getInteractContractsCall::abi_decode_returns(&out, true)
        .map_err(|e| BackendError::Abi(format!("getInteractContracts of {}: {}", address, e)))?;
    Ok(decoded.contracts)
}
