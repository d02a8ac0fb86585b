//! JSON-RPC request classification for device-directed RPC.
//!
//! The server does not interpret RPC payloads beyond deciding whether
//! the device is expected to answer. Per JSON-RPC 2.0 a request
//! without an `id` member is a notification; a batch is a pure
//! notification only if every element is one.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RpcParseError {
    #[error("invalid JSON-RPC request: {0}")]
    Invalid(String),
}

/// Decide whether an outbound RPC payload expects a response.
///
/// Accepts a single request object or a batch array. An empty batch or
/// a non-object element is rejected, as is anything that is not valid
/// JSON.
pub fn needs_response(raw: &[u8]) -> Result<bool, RpcParseError> {
    let value: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| RpcParseError::Invalid(e.to_string()))?;

    match value {
        serde_json::Value::Object(obj) => Ok(has_id(&obj)),
        serde_json::Value::Array(batch) => {
            if batch.is_empty() {
                return Err(RpcParseError::Invalid("empty batch".into()));
            }
            let mut need = false;
            for element in &batch {
                let obj = element.as_object().ok_or_else(|| {
                    RpcParseError::Invalid("batch element is not an object".into())
                })?;
                need = need || has_id(obj);
            }
            Ok(need)
        }
        other => Err(RpcParseError::Invalid(format!(
            "expected object or array, got {other}"
        ))),
    }
}

fn has_id(obj: &serde_json::Map<String, serde_json::Value>) -> bool {
    matches!(obj.get("id"), Some(v) if !v.is_null())
}
