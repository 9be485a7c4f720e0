//! Execute handler
//!
//! Every touched program is staged first (ACL check, execution bump, key rotation,
//! re-encryption). Blobs are written only once the whole event is authorised, and the round
//! cache is updated only once every blob is written, so a denied call or a failed write
//! leaves no trace besides its Error output.

use super::{encode, ProcessError, Processor, ACL_DENIED};
use crate::crypto::{self, SymmetricKey};
use crate::ledger::Ledger;
use crate::program::{ProgramInfo, ProgramRecord, Resolver};
use crate::store::Category;
use crate::types::{Event, Output};
use alloy_primitives::Address;
use log::{debug, info};

/// A touched program's next version, ready to persist.
struct Staged {
    address: Address,
    info: ProgramInfo,
    record: ProgramRecord,
    info_blob: Vec<u8>,
    state_blob: Vec<u8>,
}

impl Processor {
    pub(super) async fn execute(
        &mut self,
        ledger: &dyn Ledger,
        event: &Event,
        encrypted_input: &[u8],
        encrypted_result_key: &[u8],
    ) -> Result<Vec<Output>, ProcessError> {
        let keys = self.keys.clone();
        let store = self.store.clone();
        let ctx = self.context(event);
        let mut resolver = Resolver::new(ledger, store.as_ref(), &mut self.cache, &keys.management);

        let target = resolver.resolve_details(event.program_address, None).await?;

        let result_key = SymmetricKey::from_encoded(
            &keys
                .transaction
                .decrypt(encrypted_result_key, &event.transaction_key)?,
        )?;
        let input = keys
            .transaction
            .decrypt(encrypted_input, &event.transaction_key)?;

        let execution = self
            .backend
            .execute(&target, &input, &ctx, &mut resolver)
            .await?;

        let mut staged = Vec::with_capacity(execution.touched.len());
        for touched in execution.touched {
            let mut info = resolver.resolve_info(touched.address).await?;
            if !info.permits(&event.caller) {
                debug!("{} denied on {}", event.caller, touched.address);
                return Err(ProcessError::Authorization(ACL_DENIED.to_string()));
            }
            if info.record_execution() {
                info!(
                    "Rotated state key of {} after {} executions ({} key(s) held)",
                    touched.address,
                    info.execution_count,
                    info.keys.len()
                );
            }

            let state_key = info
                .latest_key()
                .ok_or_else(|| ProcessError::Codec(format!("{} has no state key", touched.address)))?;
            let state_blob = state_key.encrypt(&touched.state)?;
            let info_bytes = info.to_bytes().map_err(|e| ProcessError::Codec(e.to_string()))?;
            let info_blob = keys.management.encrypt(&info_bytes)?;

            staged.push(Staged {
                address: touched.address,
                info,
                record: ProgramRecord {
                    code: touched.code,
                    states: touched.state,
                },
                info_blob,
                state_blob,
            });
        }
        drop(resolver);

        let encrypted_result = result_key.encrypt(&encode::encode_result(&execution.result)?)?;

        // every blob lands before the cache sees any of them, so a failed put leaves the
        // round exactly as it was before this event
        let mut hashes = Vec::with_capacity(staged.len());
        for program in &staged {
            let info_hash = crypto::hash(&program.info_blob);
            let states_hash = crypto::hash(&program.state_blob);
            store.put(program.address, Category::Info, info_hash, &program.info_blob)?;
            store.put(program.address, Category::State, states_hash, &program.state_blob)?;
            hashes.push((info_hash, states_hash));
        }

        let mut outputs = Vec::with_capacity(staged.len());
        for (index, (program, (info_hash, states_hash))) in staged.into_iter().zip(hashes).enumerate() {
            self.cache.set_info(program.address, program.info);
            self.cache.set_details(program.address, program.record);

            outputs.push(if index == 0 {
                Output::execution(
                    program.address,
                    info_hash,
                    states_hash,
                    encrypted_result.clone(),
                    encrypted_result_key.to_vec(),
                )
            } else {
                Output::interact(program.address, info_hash, states_hash)
            });
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::bytecode::testing::{self, ScriptedFactory};
    use crate::backend::interpreted::tests::COUNTER;
    use crate::backend::{BytecodeBackend, ExecutionBackend};
    use crate::client;
    use crate::process::tests::Harness;
    use crate::process::ACL_DENIED;
    use crate::program::ProgramConfig;
    use crate::store::{BlobStore, Category, MemoryStore, StoreError};
    use crate::types::TransType;
    use alloy_primitives::{Address, B256, U256};
    use alloy_sol_types::SolValue;
    use std::sync::{Arc, Mutex};

    const CALLER: Address = Address::repeat_byte(0xC1);

    fn increment(n: i64) -> Vec<u8> {
        format!(r#"{{"function": "Increment", "args": [{}]}}"#, n).into_bytes()
    }

    async fn deployed(h: &mut Harness, config: ProgramConfig) -> Address {
        let program = h.deploy(CALLER, COUNTER.as_bytes(), &config).await;
        h.round().await;
        program
    }

    #[tokio::test]
    async fn test_execute_returns_encrypted_result() {
        let mut h = Harness::interpreted();
        let program = deployed(&mut h, ProgramConfig::default()).await;

        let key = h.call(CALLER, program, &increment(7)).await;
        let outputs = h.round().await;

        assert_eq!(outputs.len(), 1);
        let output = &outputs[0];
        assert_eq!(output.trans_type, TransType::Execution);
        assert_eq!(output.program_address, program);
        assert!(!output.encrypted_result_key.is_empty());
        assert_eq!(client::open_result(&key, &output.result).unwrap(), b"7");

        assert_eq!(h.state(program).await["count"], 7);
        assert_eq!(h.info(program).await.execution_count, 1);
    }

    #[tokio::test]
    async fn test_structured_result_decodes_to_backend_value() {
        let mut h = Harness::interpreted();
        let program = deployed(&mut h, ProgramConfig::default()).await;

        let key = h
            .call(CALLER, program, br#"{"function": "Echo", "args": [{"a": [1, 2], "b": "x"}]}"#)
            .await;
        let outputs = h.round().await;
        let plain = client::open_result(&key, &outputs[0].result).unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&plain).unwrap();
        assert_eq!(decoded, serde_json::json!({"a": [1, 2], "b": "x"}));
    }

    #[tokio::test]
    async fn test_acl_denial_writes_nothing() {
        let mut h = Harness::interpreted();
        let config = ProgramConfig {
            acl: vec![Address::repeat_byte(0xA), Address::repeat_byte(0xB)],
            ..Default::default()
        };
        let program = h.deploy(Address::repeat_byte(0xA), COUNTER.as_bytes(), &config).await;
        h.round().await;
        let info_versions = h.store.versions(program, Category::Info);
        let state_versions = h.store.versions(program, Category::State);

        h.call(Address::repeat_byte(0xC), program, &increment(1)).await;
        let outputs = h.round().await;

        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].is_error());
        assert_eq!(outputs[0].result, ACL_DENIED.as_bytes());
        assert!(!outputs[0].encrypted_result_key.is_empty());
        assert_eq!(h.store.versions(program, Category::Info), info_versions);
        assert_eq!(h.store.versions(program, Category::State), state_versions);
        assert_eq!(h.info(program).await.execution_count, 0);

        // a listed caller goes through
        h.call(Address::repeat_byte(0xB), program, &increment(1)).await;
        assert_eq!(h.round().await[0].trans_type, TransType::Execution);
    }

    #[tokio::test]
    async fn test_key_rotation_appends() {
        let mut h = Harness::interpreted();
        let config = ProgramConfig {
            key_rotation: 3,
            ..Default::default()
        };
        let program = deployed(&mut h, config).await;
        let original = h.info(program).await.keys;

        for _ in 0..2 {
            h.call(CALLER, program, &increment(1)).await;
            h.round().await;
        }
        assert_eq!(h.info(program).await.keys, original);

        h.call(CALLER, program, &increment(1)).await;
        h.round().await;
        let info = h.info(program).await;
        assert_eq!(info.keys.len(), 2);
        assert_eq!(info.keys[0], original[0]);
        // state is now readable with the newest key only
        assert_eq!(h.state(program).await["count"], 3);
    }

    #[tokio::test]
    async fn test_key_rotation_discards_history() {
        let mut h = Harness::interpreted();
        let config = ProgramConfig {
            key_rotation: 3,
            history_key_discard: true,
            ..Default::default()
        };
        let program = deployed(&mut h, config).await;
        let original = h.info(program).await.keys;

        for _ in 0..3 {
            h.call(CALLER, program, &increment(1)).await;
        }
        h.round().await;

        let info = h.info(program).await;
        assert_eq!(info.keys.len(), 1);
        assert_ne!(info.keys[0], original[0]);
        assert_eq!(info.execution_count, 3);
    }

    #[tokio::test]
    async fn test_nonce_redrawn_every_execution() {
        let mut h = Harness::interpreted();
        let program = deployed(&mut h, ProgramConfig::default()).await;
        let before = h.info(program).await;
        let pointers = h.ledger.pointers(program).await.unwrap();

        h.call(CALLER, program, br#"{"function": "Snapshot", "args": []}"#).await;
        let outputs = h.round().await;
        let after = h.info(program).await;
        assert_ne!(before.nonce, after.nonce);
        assert_ne!(outputs[0].info, pointers.info);
        assert_ne!(outputs[0].states, pointers.states);
    }

    #[tokio::test]
    async fn test_unknown_program_is_error_output() {
        let mut h = Harness::interpreted();
        h.call(CALLER, Address::repeat_byte(0x77), &increment(1)).await;
        let outputs = h.round().await;
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].is_error());
        assert_eq!(outputs[0].result, b"Integrity check failed");
    }

    #[tokio::test]
    async fn test_tampered_state_is_error_output() {
        let mut h = Harness::interpreted();
        let program = deployed(&mut h, ProgramConfig::default()).await;
        let pointers = h.ledger.pointers(program).await.unwrap();
        let mut blob = h.store.get(program, Category::State, &pointers.states).unwrap().unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        h.store.corrupt(program, Category::State, &pointers.states, blob);

        h.call(CALLER, program, &increment(1)).await;
        let outputs = h.round().await;
        assert!(outputs[0].is_error());
        assert_eq!(outputs[0].result, b"Integrity check failed");
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_round_going() {
        let mut h = Harness::interpreted();
        let program = deployed(&mut h, ProgramConfig::default()).await;

        h.call(CALLER, program, br#"{"function": "Missing", "args": []}"#).await;
        let key = h.call(CALLER, program, &increment(2)).await;
        let outputs = h.round().await;

        assert_eq!(outputs.len(), 2);
        assert!(outputs[0].is_error());
        // the unbound symbol stays inside the enclave
        assert_eq!(outputs[0].result, b"Execution failed");
        assert_eq!(client::open_result(&key, &outputs[1].result).unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_interact_graph_outputs() {
        let mut h = Harness::with_backend(ExecutionBackend::Bytecode(BytecodeBackend::new(Box::new(
            ScriptedFactory,
        ))));
        let a = h.deploy(CALLER, &testing::code(&[]), &ProgramConfig::default()).await;
        let b = h.deploy(CALLER, &testing::code(&[]), &ProgramConfig::default()).await;
        let primary = h.deploy(CALLER, &testing::code(&[a, b]), &ProgramConfig::default()).await;
        assert_eq!(h.round().await.len(), 3);

        let key = h.call(CALLER, primary, &testing::bump_input()).await;
        let outputs = h.round().await;

        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].trans_type, TransType::Execution);
        assert_eq!(outputs[0].program_address, primary);
        assert_eq!(outputs[1].trans_type, TransType::Interact);
        assert_eq!(outputs[1].program_address, a);
        assert_eq!(outputs[2].trans_type, TransType::Interact);
        assert_eq!(outputs[2].program_address, b);
        assert!(outputs[1].result.is_empty());
        assert_ne!(outputs[1].info, outputs[2].info);
        assert_ne!(outputs[1].states, outputs[2].states);

        let result = client::open_result(&key, &outputs[0].result).unwrap();
        assert_eq!(U256::abi_decode(&result, true).unwrap(), U256::from(1));

        assert_eq!(h.state(a).await["counter"], 1);
        assert_eq!(h.state(primary).await["counter"], 1);
        assert_eq!(h.info(b).await.execution_count, 1);
    }

    #[tokio::test]
    async fn test_acl_on_sub_program_aborts_event() {
        let mut h = Harness::with_backend(ExecutionBackend::Bytecode(BytecodeBackend::new(Box::new(
            ScriptedFactory,
        ))));
        let private = ProgramConfig {
            acl: vec![Address::repeat_byte(0xAD)],
            ..Default::default()
        };
        let locked = h.deploy(Address::repeat_byte(0xAD), &testing::code(&[]), &private).await;
        let primary = h
            .deploy(CALLER, &testing::code(&[locked]), &ProgramConfig::default())
            .await;
        h.round().await;

        h.call(CALLER, primary, &testing::bump_input()).await;
        let outputs = h.round().await;
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].is_error());
        assert_eq!(h.store.versions(primary, Category::Info), 1);
        assert_eq!(h.info(primary).await.execution_count, 0);
    }

    /// Store that fails the next put for one address and category
    struct FlakyStore {
        inner: Arc<MemoryStore>,
        fail: Arc<Mutex<Option<(Address, Category)>>>,
    }

    impl BlobStore for FlakyStore {
        fn put(&self, address: Address, category: Category, hash: B256, bytes: &[u8]) -> Result<(), StoreError> {
            let mut fail = self.fail.lock().unwrap();
            if *fail == Some((address, category)) {
                *fail = None;
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            drop(fail);
            self.inner.put(address, category, hash, bytes)
        }

        fn get(&self, address: Address, category: Category, hash: &B256) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(address, category, hash)
        }
    }

    #[tokio::test]
    async fn test_failed_write_leaves_round_cache_untouched() {
        let armed: Arc<Mutex<Option<(Address, Category)>>> = Arc::default();
        let fail = armed.clone();
        let mut h = Harness::with_store(
            ExecutionBackend::Bytecode(BytecodeBackend::new(Box::new(ScriptedFactory))),
            move |inner| Arc::new(FlakyStore { inner, fail }) as Arc<dyn BlobStore>,
        );
        let a = h.deploy(CALLER, &testing::code(&[]), &ProgramConfig::default()).await;
        let primary = h.deploy(CALLER, &testing::code(&[a]), &ProgramConfig::default()).await;
        h.round().await;

        // the primary's blobs land, then the sub-program's info write fails
        *armed.lock().unwrap() = Some((a, Category::Info));
        h.call(CALLER, primary, &testing::bump_input()).await;
        let key = h.call(CALLER, primary, &testing::bump_input()).await;
        let outputs = h.round().await;

        assert_eq!(outputs.len(), 3);
        assert!(outputs[0].is_error());
        assert_eq!(outputs[0].result, b"Store error");

        // the second call starts from the published versions, not the failed event's
        let result = client::open_result(&key, &outputs[1].result).unwrap();
        assert_eq!(U256::abi_decode(&result, true).unwrap(), U256::from(1));
        assert_eq!(h.state(a).await["counter"], 1);
        assert_eq!(h.info(primary).await.execution_count, 1);
        assert_eq!(h.info(a).await.execution_count, 1);
    }
}
