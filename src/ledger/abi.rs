//! Management registry ABI.
//!
//! The on-chain `Output` tuple is `(programAddress, info, states, result, encryptedResultKey,
//! code, transType)`; field order matters for `hashOutputs`.

use super::LedgerError;
use crate::types::{self, TransType};
use alloy_primitives::U256;
use alloy_sol_types::{sol, SolCall};

sol! {
    #[derive(Debug, PartialEq, Eq)]
    struct BlockInfo {
        uint256 blockNumber;
        bytes32 blockHash;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct OutputRecord {
        address programAddress;
        bytes32 info;
        bytes32 states;
        bytes result;
        bytes encryptedResultKey;
        bytes32 code;
        uint8 transType;
    }

    #[derive(Debug, PartialEq, Eq)]
    interface IManagement {
        function hashOutputs(BlockInfo startBlock, BlockInfo endBlock, OutputRecord[] outputs)
            external view returns (bytes32 digest);
        function output(BlockInfo startBlock, BlockInfo endBlock, OutputRecord[] outputs, bytes signature)
            external;
        function register(bytes attestation, bytes key) external payable;
    }
}

impl From<&types::BlockInfo> for BlockInfo {
    fn from(block: &types::BlockInfo) -> Self {
        Self {
            blockNumber: U256::from(block.number),
            blockHash: block.hash,
        }
    }
}

impl From<&types::Output> for OutputRecord {
    fn from(output: &types::Output) -> Self {
        Self {
            programAddress: output.program_address,
            info: output.info,
            states: output.states,
            result: output.result.clone().into(),
            encryptedResultKey: output.encrypted_result_key.clone().into(),
            code: output.code,
            transType: output.trans_type.as_u8(),
        }
    }
}

impl TryFrom<&OutputRecord> for types::Output {
    type Error = LedgerError;

    fn try_from(record: &OutputRecord) -> Result<Self, Self::Error> {
        let trans_type = TransType::from_u8(record.transType)
            .ok_or_else(|| LedgerError::Abi(format!("unknown transType {}", record.transType)))?;
        Ok(Self {
            trans_type,
            program_address: record.programAddress,
            info: record.info,
            states: record.states,
            code: record.code,
            result: record.result.to_vec(),
            encrypted_result_key: record.encryptedResultKey.to_vec(),
        })
    }
}

/// Block number of an ABI block descriptor, saturating on overflow
pub fn block_number(block: &BlockInfo) -> u64 {
    u64::try_from(block.blockNumber).unwrap_or(u64::MAX)
}

pub fn output_records(outputs: &[types::Output]) -> Vec<OutputRecord> {
    outputs.iter().map(OutputRecord::from).collect()
}

/// Outputs carried by the calldata of an `output` transaction
pub fn submitted_outputs(input: &[u8]) -> Result<Vec<types::Output>, LedgerError> {
    let call = IManagement::outputCall::abi_decode(input, true)
        .map_err(|e| LedgerError::Abi(e.to_string()))?;
    call.outputs.iter().map(types::Output::try_from).collect()
}
