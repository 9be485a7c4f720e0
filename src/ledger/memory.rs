//! In-process ledger implementing the management registry.
//!
//! Users submit Deploy/Execution events which land in the next mined block. The registry
//! side keeps per-program hash pointers, enclave registrations and the last processed block,
//! and accepts an `output` transaction only when:
//! - its start block is the last processed block and both block hashes match the chain
//! - the signature over `hashOutputs` recovers to the sender's registered enclave key
//!
//! Accepted batches move every non-Error output's pointers and advance the processed block.

use super::abi::{self, IManagement};
use super::{Ledger, LedgerError, Registration, TransactionRequest};
use crate::crypto::{recover_signer, signer::address_of};
use crate::types::{BlockInfo, Event, EventPayload, Output, TransType};
use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const BLOCK_TIME: u64 = 12;
const BASE_GAS: u64 = 21_000;
const GAS_PER_BYTE: u64 = 16;

/// Hash pointers the registry holds for one program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pointers {
    pub info: B256,
    pub code: B256,
    pub states: B256,
}

#[derive(Debug)]
struct Chain {
    blocks: Vec<BlockInfo>,
    events: Vec<Event>,
    pending: Vec<Event>,
    programs: HashMap<Address, Pointers>,
    registrations: HashMap<Address, Registration>,
    latest_processed: u64,
    nonces: HashMap<Address, u64>,
    deploy_nonces: HashMap<Address, u64>,
    transactions: Vec<TransactionRequest>,
    gas_price: u128,
    fail_sends: bool,
}

impl Chain {
    fn head(&self) -> &BlockInfo {
        // never empty: genesis is pushed at construction
        &self.blocks[self.blocks.len() - 1]
    }

    fn block(&self, number: u64) -> Option<&BlockInfo> {
        let first = self.blocks.first()?.number;
        let index = number.checked_sub(first)? as usize;
        self.blocks.get(index)
    }

    fn check_block(&self, block: &abi::BlockInfo) -> Result<u64, LedgerError> {
        let number = abi::block_number(block);
        let known = self
            .block(number)
            .ok_or(LedgerError::BlockNotFound(number))?;
        if known.hash != block.blockHash {
            return Err(LedgerError::Rejected(format!("hash mismatch for block {}", number)));
        }
        Ok(number)
    }

    fn apply_output(&mut self, from: Address, call: IManagement::outputCall) -> Result<(), LedgerError> {
        let start = self.check_block(&call.startBlock)?;
        let end = self.check_block(&call.endBlock)?;
        if start != self.latest_processed {
            return Err(LedgerError::Rejected(format!(
                "start block {} does not follow processed block {}",
                start, self.latest_processed
            )));
        }
        if end <= start {
            return Err(LedgerError::Rejected(format!("empty range {}..{}", start, end)));
        }

        let registration = self
            .registrations
            .get(&from)
            .ok_or_else(|| LedgerError::Rejected(format!("{} is not a registered enclave", from)))?;
        let public_key: [u8; 64] = registration.public_key[..]
            .try_into()
            .map_err(|_| LedgerError::Rejected("malformed registered key".into()))?;

        let digest = digest_outputs(&call.startBlock, &call.endBlock, &call.outputs);
        let signer = recover_signer(&digest, &call.signature)
            .map_err(|e| LedgerError::Rejected(e.to_string()))?;
        if signer != address_of(&public_key) {
            return Err(LedgerError::Rejected(format!(
                "signature from {} does not match the registered enclave",
                signer
            )));
        }

        let outputs = call
            .outputs
            .iter()
            .map(Output::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        // a batch may deploy a program and run it in a later output; anything else must
        // already be registered, and nothing moves until the whole batch checks out
        let mut deployed = HashSet::new();
        for output in &outputs {
            match output.trans_type {
                TransType::Deploy => {
                    deployed.insert(output.program_address);
                }
                TransType::Execution | TransType::Interact => {
                    if !deployed.contains(&output.program_address)
                        && !self.programs.contains_key(&output.program_address)
                    {
                        return Err(LedgerError::Rejected(format!(
                            "{} is not a deployed program",
                            output.program_address
                        )));
                    }
                }
                TransType::Error => {}
            }
        }

        for output in outputs.iter().filter(|o| o.trans_type != TransType::Error) {
            let pointers = self.programs.entry(output.program_address).or_default();
            if output.trans_type == TransType::Deploy {
                pointers.code = output.code;
            }
            pointers.info = output.info;
            pointers.states = output.states;
        }
        self.latest_processed = end;
        info!(
            "Registry accepted {} outputs for blocks {}..={}",
            outputs.len(),
            start + 1,
            end
        );
        Ok(())
    }
}

/// ABI-encode `(startBlock, endBlock, outputs)` and hash it.
fn digest_outputs(start: &abi::BlockInfo, end: &abi::BlockInfo, outputs: &[abi::OutputRecord]) -> B256 {
    let call = IManagement::hashOutputsCall {
        startBlock: start.clone(),
        endBlock: end.clone(),
        outputs: outputs.to_vec(),
    };
    let encoded = call.abi_encode();
    // drop the selector; only the argument tuple is hashed
    keccak256(&encoded[4..])
}

/// In-process chain plus management registry.
#[derive(Debug)]
pub struct MemoryLedger {
    chain: Mutex<Chain>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(0)
    }
}

impl MemoryLedger {
    /// New chain whose genesis block is `genesis_number`; the registry starts with genesis
    /// as its last processed block.
    pub fn new(genesis_number: u64) -> Self {
        let genesis = BlockInfo {
            number: genesis_number,
            hash: keccak256(genesis_number.to_be_bytes()),
            timestamp: GENESIS_TIMESTAMP,
        };
        Self {
            chain: Mutex::new(Chain {
                blocks: vec![genesis],
                events: Vec::new(),
                pending: Vec::new(),
                programs: HashMap::new(),
                registrations: HashMap::new(),
                latest_processed: genesis_number,
                nonces: HashMap::new(),
                deploy_nonces: HashMap::new(),
                transactions: Vec::new(),
                gas_price: 1_000_000_000,
                fail_sends: false,
            }),
        }
    }

    /// Queue a Deploy event for the next block; returns the new program's address.
    pub async fn submit_deploy(
        &self,
        caller: Address,
        encrypted_code: Vec<u8>,
        encrypted_config: Vec<u8>,
        transaction_key: Vec<u8>,
    ) -> Address {
        let mut chain = self.chain.lock().await;
        let nonce = chain.deploy_nonces.entry(caller).or_insert(0);
        let program_address = caller.create(*nonce);
        *nonce += 1;
        let log_index = chain.pending.len() as u64;
        chain.pending.push(Event {
            program_address,
            caller,
            payload: EventPayload::Deploy {
                encrypted_code,
                encrypted_config,
            },
            transaction_key,
            block_number: 0,
            block_time: 0,
            tx_hash: B256::ZERO,
            log_index,
        });
        program_address
    }

    /// Queue an Execution event for the next block.
    pub async fn submit_execution(
        &self,
        caller: Address,
        program_address: Address,
        encrypted_input: Vec<u8>,
        encrypted_result_key: Vec<u8>,
        transaction_key: Vec<u8>,
    ) {
        let mut chain = self.chain.lock().await;
        let log_index = chain.pending.len() as u64;
        chain.pending.push(Event {
            program_address,
            caller,
            payload: EventPayload::Execution {
                encrypted_input,
                encrypted_result_key,
            },
            transaction_key,
            block_number: 0,
            block_time: 0,
            tx_hash: B256::ZERO,
            log_index,
        });
    }

    /// Seal queued events into a new block and return it.
    pub async fn mine(&self) -> BlockInfo {
        let mut chain = self.chain.lock().await;
        let parent = *chain.head();
        let number = parent.number + 1;
        let timestamp = parent.timestamp + BLOCK_TIME;

        let mut preimage = parent.hash.to_vec();
        preimage.extend_from_slice(&number.to_be_bytes());
        let block = BlockInfo {
            number,
            hash: keccak256(&preimage),
            timestamp,
        };

        let pending = std::mem::take(&mut chain.pending);
        for mut event in pending {
            event.block_number = number;
            event.block_time = timestamp;
            let mut tx_preimage = block.hash.to_vec();
            tx_preimage.extend_from_slice(&event.log_index.to_be_bytes());
            event.tx_hash = keccak256(&tx_preimage);
            chain.events.push(event);
        }
        chain.blocks.push(block);
        debug!("Mined block {}", number);
        block
    }

    pub async fn pointers(&self, program: Address) -> Option<Pointers> {
        self.chain.lock().await.programs.get(&program).copied()
    }

    /// Overwrite a program's pointers directly
    pub async fn set_pointers(&self, program: Address, pointers: Pointers) {
        self.chain.lock().await.programs.insert(program, pointers);
    }

    /// Transactions accepted so far, in order
    pub async fn transactions(&self) -> Vec<TransactionRequest> {
        self.chain.lock().await.transactions.clone()
    }

    pub async fn set_gas_price(&self, price: u128) {
        self.chain.lock().await.gas_price = price;
    }

    /// Make every `send_transaction` fail with a transport error
    pub async fn set_fail_sends(&self, fail: bool) {
        self.chain.lock().await.fail_sends = fail;
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn block_number(&self) -> Result<u64, LedgerError> {
        Ok(self.chain.lock().await.head().number)
    }

    async fn block(&self, number: u64) -> Result<BlockInfo, LedgerError> {
        self.chain
            .lock()
            .await
            .block(number)
            .copied()
            .ok_or(LedgerError::BlockNotFound(number))
    }

    async fn events(&self, from: u64, to: u64) -> Result<Vec<Event>, LedgerError> {
        let chain = self.chain.lock().await;
        Ok(chain
            .events
            .iter()
            .filter(|e| e.block_number >= from && e.block_number <= to)
            .cloned()
            .collect())
    }

    async fn info_pointer(&self, program: Address) -> Result<B256, LedgerError> {
        Ok(self.pointers(program).await.unwrap_or_default().info)
    }

    async fn code_pointer(&self, program: Address) -> Result<B256, LedgerError> {
        Ok(self.pointers(program).await.unwrap_or_default().code)
    }

    async fn states_pointer(&self, program: Address) -> Result<B256, LedgerError> {
        Ok(self.pointers(program).await.unwrap_or_default().states)
    }

    async fn latest_processed_block(&self) -> Result<u64, LedgerError> {
        Ok(self.chain.lock().await.latest_processed)
    }

    async fn hash_outputs(
        &self,
        start: &BlockInfo,
        end: &BlockInfo,
        outputs: &[Output],
    ) -> Result<B256, LedgerError> {
        Ok(digest_outputs(
            &abi::BlockInfo::from(start),
            &abi::BlockInfo::from(end),
            &abi::output_records(outputs),
        ))
    }

    async fn enclave_registration(
        &self,
        account: Address,
    ) -> Result<Option<Registration>, LedgerError> {
        Ok(self.chain.lock().await.registrations.get(&account).cloned())
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64, LedgerError> {
        Ok(self
            .chain
            .lock()
            .await
            .nonces
            .get(&account)
            .copied()
            .unwrap_or(0))
    }

    async fn gas_price(&self) -> Result<u128, LedgerError> {
        Ok(self.chain.lock().await.gas_price)
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, LedgerError> {
        Ok(BASE_GAS + GAS_PER_BYTE * tx.input.len() as u64)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256, LedgerError> {
        let mut chain = self.chain.lock().await;
        if chain.fail_sends {
            return Err(LedgerError::Rpc("connection refused".into()));
        }

        let expected = chain.nonces.get(&tx.from).copied().unwrap_or(0);
        if tx.nonce != expected {
            return Err(LedgerError::Rejected(format!(
                "nonce {} for {}, expected {}",
                tx.nonce, tx.from, expected
            )));
        }
        let required = BASE_GAS + GAS_PER_BYTE * tx.input.len() as u64;
        if tx.gas_limit < required {
            return Err(LedgerError::Rejected(format!(
                "gas limit {} below intrinsic {}",
                tx.gas_limit, required
            )));
        }

        let selector: [u8; 4] = tx
            .input
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| LedgerError::Abi("missing selector".into()))?;
        if selector == IManagement::outputCall::SELECTOR {
            let call = IManagement::outputCall::abi_decode(&tx.input, true)
                .map_err(|e| LedgerError::Abi(e.to_string()))?;
            chain.apply_output(tx.from, call)?;
        } else if selector == IManagement::registerCall::SELECTOR {
            let call = IManagement::registerCall::abi_decode(&tx.input, true)
                .map_err(|e| LedgerError::Abi(e.to_string()))?;
            if tx.value == U256::ZERO {
                return Err(LedgerError::Rejected("registration requires a stake".into()));
            }
            if call.key.len() != 64 {
                return Err(LedgerError::Rejected(format!(
                    "enclave key must be 64 bytes, got {}",
                    call.key.len()
                )));
            }
            info!("Registered enclave for {} with stake {}", tx.from, tx.value);
            chain.registrations.insert(
                tx.from,
                Registration {
                    public_key: call.key,
                    stake: tx.value,
                    attestation: call.attestation,
                },
            );
        } else {
            return Err(LedgerError::Abi(format!(
                "unknown selector 0x{}",
                hex::encode(selector)
            )));
        }

        chain.nonces.insert(tx.from, expected + 1);
        let mut preimage = tx.from.to_vec();
        preimage.extend_from_slice(&tx.nonce.to_be_bytes());
        let hash = keccak256(&preimage);
        chain.transactions.push(tx);
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EnclaveSigner;
    use alloy_primitives::Bytes;

    fn request(from: Address, nonce: u64, input: Vec<u8>, value: U256) -> TransactionRequest {
        TransactionRequest {
            from,
            to: Address::ZERO,
            nonce,
            gas_price: 1,
            gas_limit: 10_000_000,
            value,
            input: Bytes::from(input),
        }
    }

    async fn submit_outputs(
        ledger: &MemoryLedger,
        account: Address,
        nonce: u64,
        signer: &EnclaveSigner,
        start: &BlockInfo,
        end: &BlockInfo,
        outputs: &[Output],
    ) -> Result<B256, LedgerError> {
        let digest = ledger.hash_outputs(start, end, outputs).await.unwrap();
        let call = IManagement::outputCall {
            startBlock: start.into(),
            endBlock: end.into(),
            outputs: abi::output_records(outputs),
            signature: Bytes::copy_from_slice(&signer.sign_digest(&digest).unwrap()),
        };
        ledger
            .send_transaction(request(account, nonce, call.abi_encode(), U256::ZERO))
            .await
    }

    async fn register(ledger: &MemoryLedger, account: Address, signer: &EnclaveSigner) {
        let call = IManagement::registerCall {
            attestation: Bytes::from_static(b"quote"),
            key: Bytes::copy_from_slice(&signer.public_key()),
        };
        ledger
            .send_transaction(request(account, 0, call.abi_encode(), U256::from(1)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mine_assigns_events() {
        let ledger = MemoryLedger::new(100);
        let caller = Address::repeat_byte(1);
        let first = ledger.submit_deploy(caller, vec![1], vec![2], vec![3]).await;
        let second = ledger.submit_deploy(caller, vec![1], vec![2], vec![3]).await;
        assert_ne!(first, second);

        let block = ledger.mine().await;
        assert_eq!(block.number, 101);
        assert_eq!(ledger.block_number().await.unwrap(), 101);

        let events = ledger.events(101, 101).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].block_number, 101);
        assert_eq!(events[1].log_index, 1);
        assert!(ledger.events(102, 200).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_requires_stake() {
        let ledger = MemoryLedger::default();
        let signer = EnclaveSigner::generate();
        let call = IManagement::registerCall {
            attestation: Bytes::new(),
            key: Bytes::copy_from_slice(&signer.public_key()),
        };
        let account = Address::repeat_byte(5);
        let err = ledger
            .send_transaction(request(account, 0, call.abi_encode(), U256::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_)));
        assert_eq!(ledger.pending_nonce(account).await.unwrap(), 0);

        register(&ledger, account, &signer).await;
        assert!(ledger.enclave_registration(account).await.unwrap().is_some());
        assert_eq!(ledger.pending_nonce(account).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_output_applies_pointers() {
        let ledger = MemoryLedger::default();
        let account = Address::repeat_byte(5);
        let signer = EnclaveSigner::generate();
        register(&ledger, account, &signer).await;

        let genesis = ledger.block(0).await.unwrap();
        let end = ledger.mine().await;
        let program = Address::repeat_byte(9);
        let outputs = vec![
            Output::deploy(program, B256::repeat_byte(1), B256::repeat_byte(2), B256::repeat_byte(3)),
            Output::error(Address::repeat_byte(8), "Caller is not in ACL", b"k"),
        ];
        let digest = ledger.hash_outputs(&genesis, &end, &outputs).await.unwrap();
        let call = IManagement::outputCall {
            startBlock: (&genesis).into(),
            endBlock: (&end).into(),
            outputs: abi::output_records(&outputs),
            signature: Bytes::copy_from_slice(&signer.sign_digest(&digest).unwrap()),
        };
        ledger
            .send_transaction(request(account, 1, call.abi_encode(), U256::ZERO))
            .await
            .unwrap();

        assert_eq!(ledger.latest_processed_block().await.unwrap(), 1);
        let pointers = ledger.pointers(program).await.unwrap();
        assert_eq!(pointers.code, B256::repeat_byte(3));
        assert!(ledger.pointers(Address::repeat_byte(8)).await.is_none());
    }

    #[tokio::test]
    async fn test_output_rejects_foreign_signature() {
        let ledger = MemoryLedger::default();
        let account = Address::repeat_byte(5);
        register(&ledger, account, &EnclaveSigner::generate()).await;

        let genesis = ledger.block(0).await.unwrap();
        let end = ledger.mine().await;
        let digest = ledger.hash_outputs(&genesis, &end, &[]).await.unwrap();
        let impostor = EnclaveSigner::generate();
        let call = IManagement::outputCall {
            startBlock: (&genesis).into(),
            endBlock: (&end).into(),
            outputs: Vec::new(),
            signature: Bytes::copy_from_slice(&impostor.sign_digest(&digest).unwrap()),
        };
        let err = ledger
            .send_transaction(request(account, 1, call.abi_encode(), U256::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_)));
        assert_eq!(ledger.latest_processed_block().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_nonce_gap_rejected() {
        let ledger = MemoryLedger::default();
        let account = Address::repeat_byte(5);
        let call = IManagement::registerCall {
            attestation: Bytes::new(),
            key: Bytes::copy_from_slice(&EnclaveSigner::generate().public_key()),
        };
        let err = ledger
            .send_transaction(request(account, 3, call.abi_encode(), U256::from(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_hash_outputs_is_order_sensitive() {
        let ledger = MemoryLedger::default();
        let genesis = ledger.block(0).await.unwrap();
        let end = ledger.mine().await;
        let a = Output::interact(Address::repeat_byte(1), B256::repeat_byte(1), B256::ZERO);
        let b = Output::interact(Address::repeat_byte(2), B256::repeat_byte(2), B256::ZERO);
        let ab = ledger.hash_outputs(&genesis, &end, &[a.clone(), b.clone()]).await.unwrap();
        let ba = ledger.hash_outputs(&genesis, &end, &[b, a]).await.unwrap();
        assert_ne!(ab, ba);
    }

    #[tokio::test]
    async fn test_output_batch_checked_before_apply() {
        let ledger = MemoryLedger::default();
        let account = Address::repeat_byte(5);
        let signer = EnclaveSigner::generate();
        register(&ledger, account, &signer).await;

        let known = Address::repeat_byte(1);
        let before = Pointers {
            info: B256::repeat_byte(1),
            code: B256::repeat_byte(2),
            states: B256::repeat_byte(3),
        };
        ledger.set_pointers(known, before).await;

        let genesis = ledger.block(0).await.unwrap();
        let end = ledger.mine().await;
        let unknown = Address::repeat_byte(2);
        let outputs = vec![
            Output::interact(known, B256::repeat_byte(7), B256::repeat_byte(7)),
            Output::interact(unknown, B256::repeat_byte(8), B256::repeat_byte(8)),
        ];
        let err = submit_outputs(&ledger, account, 1, &signer, &genesis, &end, &outputs)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(ref msg) if msg.contains("not a deployed program")));
        assert_eq!(ledger.pointers(known).await, Some(before));
        assert!(ledger.pointers(unknown).await.is_none());
        assert_eq!(ledger.latest_processed_block().await.unwrap(), 0);

        // deploy then run in the same batch; the Error output is only a receipt
        let fresh = Address::repeat_byte(3);
        let outputs = vec![
            Output::deploy(fresh, B256::repeat_byte(4), B256::repeat_byte(5), B256::repeat_byte(6)),
            Output::execution(fresh, B256::repeat_byte(9), B256::repeat_byte(10), vec![1], vec![2]),
            Output::error(known, "Execution failed", b"k"),
        ];
        submit_outputs(&ledger, account, 1, &signer, &genesis, &end, &outputs)
            .await
            .unwrap();
        let pointers = ledger.pointers(fresh).await.unwrap();
        assert_eq!(pointers.code, B256::repeat_byte(6));
        assert_eq!(pointers.info, B256::repeat_byte(9));
        assert_eq!(pointers.states, B256::repeat_byte(10));
        assert_eq!(ledger.pointers(known).await, Some(before));
        assert_eq!(ledger.latest_processed_block().await.unwrap(), 1);
    }
}
