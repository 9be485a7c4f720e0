//! Result encoding before re-encryption under the caller's result key
//!
//! Raw bytes and text pass through, scalars are stringified, structured values become JSON
//! text and fall back to bincode when they have no JSON form (e.g. closures).

use super::ProcessError;
use crate::backend::CallResult;

pub fn encode_result(result: &CallResult) -> Result<Vec<u8>, ProcessError> {
    Ok(match result {
        CallResult::Nil => Vec::new(),
        CallResult::Bytes(bytes) => bytes.clone(),
        CallResult::Text(text) => text.as_bytes().to_vec(),
        CallResult::Integer(n) => n.to_string().into_bytes(),
        CallResult::Bool(b) => b.to_string().into_bytes(),
        CallResult::Structured(value) => match value.to_json() {
            Ok(json) => serde_json::to_vec(&json).map_err(|e| ProcessError::Codec(e.to_string()))?,
            Err(_) => bincode::serialize(value).map_err(|e| ProcessError::Codec(e.to_string()))?,
        },
    })
}
