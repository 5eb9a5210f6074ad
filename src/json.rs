//! Shape guards applied to every decoded upstream JSON body before any field access.

use serde_json::{Map, Value};

use crate::error::FeideOidcError;

/// Narrows `value` to a JSON object, or fails with a `Shape` error carrying `error`.
pub fn require_object(value: Value, error: &str) -> Result<Map<String, Value>, FeideOidcError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(FeideOidcError::Shape(format!("{error} (expected object)"))),
    }
}

/// Narrows `value` to a JSON array, or fails with a `Shape` error carrying `error`.
pub fn require_array(value: Value, error: &str) -> Result<Vec<Value>, FeideOidcError> {
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(FeideOidcError::Shape(format!("{error} (expected array)"))),
    }
}
