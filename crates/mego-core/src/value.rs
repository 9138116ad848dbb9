//! Dynamic values carried in parameters, results and session keys.

pub use serde_json::Value;

/// String-keyed map of dynamic values, used for per-session state.
pub type Keys = serde_json::Map<String, Value>;

/// Converts a value into [`Keys`] if it is an object.
pub fn into_keys(value: Value) -> Option<Keys> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
