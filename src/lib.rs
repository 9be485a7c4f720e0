//! tee-exec: confidential program execution inside a trusted enclave
//!
//! Programs are deployed to a ledger as encrypted payloads and only ever decrypted inside
//! the enclave. The executor follows the ledger round by round:
//! - Deploy and Execution events are decrypted, run on the configured backend and
//!   re-encrypted into an untrusted off-chain store addressed by content hash
//! - per-program info records carry the keys, access list and key-rotation policy
//! - each round's outputs are signed by the enclave and submitted as one transaction

pub mod attestation;
pub mod backend;
pub mod client;
pub mod config;
pub mod crypto;
pub mod executor;
pub mod ledger;
pub mod process;
pub mod program;
pub mod store;
pub mod submit;
pub mod types;

pub use backend::{ExecutionBackend, ExecutionContext};
pub use config::{BackendKind, ExecutorConfig};
pub use crypto::EnclaveKeys;
pub use executor::{Executor, ExecutorError, RoundReport};
pub use ledger::{Ledger, MemoryLedger};
pub use process::{ProcessError, Processor};
pub use program::{ProgramConfig, ProgramInfo};
pub use store::{BlobStore, FileStore, MemoryStore};
pub use submit::Submitter;
pub use types::{Event, Output, TransType};
