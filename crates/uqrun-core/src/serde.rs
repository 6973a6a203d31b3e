use serde::Serialize;

use crate::errors::{ErrorInfo, UqError};

/// Serialises `value` as JSON with object keys in sorted order.
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, UqError> {
    let value = serde_json::to_value(value)
        .map_err(|err| UqError::Serde(ErrorInfo::new("json-encode", err.to_string())))?;
    serde_json::to_vec(&value)
        .map_err(|err| UqError::Serde(ErrorInfo::new("json-encode", err.to_string())))
}
