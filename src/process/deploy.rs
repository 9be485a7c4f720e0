//! Deploy handler

use super::{ProcessError, Processor};
use crate::crypto::{self, SymmetricKey};
use crate::program::{ProgramConfig, ProgramInfo, ProgramRecord};
use crate::store::Category;
use crate::types::{Event, Output};
use log::debug;

impl Processor {
    /// Decrypt, deploy and persist a new program under fresh keys.
    pub(super) fn deploy(
        &mut self,
        event: &Event,
        encrypted_code: &[u8],
        encrypted_config: &[u8],
    ) -> Result<Output, ProcessError> {
        let code = self
            .keys
            .transaction
            .decrypt(encrypted_code, &event.transaction_key)?;
        let config_bytes = self
            .keys
            .transaction
            .decrypt(encrypted_config, &event.transaction_key)?;
        let config = if config_bytes.is_empty() {
            ProgramConfig::default()
        } else {
            ProgramConfig::from_json(&config_bytes).map_err(|e| ProcessError::Codec(e.to_string()))?
        };

        let ctx = self.context(event);
        let deployment = self
            .backend
            .deploy(&code, &ctx)
            .map_err(ProcessError::Execution)?;

        let state_key = SymmetricKey::generate();
        let code_key = SymmetricKey::generate();
        let info = ProgramInfo::new(&config, state_key.clone(), code_key.clone());

        let info_bytes = info.to_bytes().map_err(|e| ProcessError::Codec(e.to_string()))?;
        let info_blob = self.keys.management.encrypt(&info_bytes)?;
        let state_blob = state_key.encrypt(&deployment.state)?;
        let code_blob = code_key.encrypt(&deployment.code)?;

        let info_hash = crypto::hash(&info_blob);
        let states_hash = crypto::hash(&state_blob);
        let code_hash = crypto::hash(&code_blob);

        let address = event.program_address;
        self.store.put(address, Category::Info, info_hash, &info_blob)?;
        self.store.put(address, Category::State, states_hash, &state_blob)?;
        self.store.put(address, Category::Code, code_hash, &code_blob)?;

        debug!(
            "Deployed {} ({} code bytes, {} state bytes, acl {})",
            address,
            deployment.code.len(),
            deployment.state.len(),
            info.acl.len()
        );
        self.cache.set_info(address, info);
        self.cache.set_details(
            address,
            ProgramRecord {
                code: deployment.code,
                states: deployment.state,
            },
        );

        Ok(Output::deploy(address, info_hash, states_hash, code_hash))
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::interpreted::tests::COUNTER;
    use crate::process::tests::Harness;
    use crate::program::ProgramConfig;
    use crate::store::Category;
    use crate::types::TransType;
    use alloy_primitives::{Address, B256};

    #[tokio::test]
    async fn test_deploy_public_program() {
        let mut h = Harness::interpreted();
        let program = h
            .deploy(Address::repeat_byte(1), COUNTER.as_bytes(), &ProgramConfig::default())
            .await;
        let outputs = h.round().await;

        assert_eq!(outputs.len(), 1);
        let output = &outputs[0];
        assert_eq!(output.trans_type, TransType::Deploy);
        assert_eq!(output.program_address, program);
        assert_ne!(output.info, B256::ZERO);
        assert_ne!(output.states, B256::ZERO);
        assert_ne!(output.code, B256::ZERO);
        assert!(output.result.is_empty());

        let info = h.info(program).await;
        assert_eq!(info.execution_count, 0);
        assert_eq!(info.keys.len(), 1);
        assert!(info.acl.is_empty());
        assert_eq!(h.state(program).await["count"], 0);

        assert_eq!(h.store.versions(program, Category::Code), 1);
        assert_eq!(h.store.versions(program, Category::Info), 1);
    }

    #[tokio::test]
    async fn test_deploy_carries_config() {
        let mut h = Harness::interpreted();
        let config = ProgramConfig {
            acl: vec![Address::repeat_byte(1), Address::repeat_byte(2)],
            key_rotation: 3,
            history_key_discard: true,
        };
        let program = h.deploy(Address::repeat_byte(1), COUNTER.as_bytes(), &config).await;
        h.round().await;

        let info = h.info(program).await;
        assert_eq!(info.acl.len(), 2);
        assert_eq!(info.key_rotation, 3);
        assert!(info.history_key_discard);
    }

    #[tokio::test]
    async fn test_deploy_failure_is_error_output() {
        let mut h = Harness::interpreted();
        let program = h
            .deploy(Address::repeat_byte(1), b"(define x", &ProgramConfig::default())
            .await;
        let outputs = h.round().await;

        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].is_error());
        assert_eq!(outputs[0].program_address, program);
        assert!(outputs[0].encrypted_result_key.is_empty());
        assert_eq!(h.store.versions(program, Category::Info), 0);
    }

    #[tokio::test]
    async fn test_deploy_sealed_to_other_enclave() {
        let mut h = Harness::interpreted();
        let other = crate::crypto::TransactionKeypair::generate();
        let sealed = crate::client::seal_deploy(&other.public_key(), COUNTER.as_bytes(), &ProgramConfig::default()).unwrap();
        h.ledger
            .submit_deploy(Address::repeat_byte(1), sealed.encrypted_code, sealed.encrypted_config, sealed.transaction_key)
            .await;

        let outputs = h.round().await;
        assert!(outputs[0].is_error());
        assert!(String::from_utf8_lossy(&outputs[0].result).contains("Decryption"));
    }
}
