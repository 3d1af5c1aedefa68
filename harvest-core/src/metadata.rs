/*!
Artifact metadata normalization.

Object stores only accept string metadata values, so every value supplied by a
caller is converted to its string form before a write. The conversion is
lossy: nothing recovers the original type on read-back.
*/

use serde_json::Value;
use std::collections::BTreeMap;

/// Caller-supplied metadata with arbitrary values
pub type Metadata = BTreeMap<String, Value>;

/// Metadata ready for a backend write
pub type NormalizedMetadata = BTreeMap<String, String>;

/// Convert a value to the string form used in metadata and filenames
///
/// Strings are kept verbatim, booleans become `True`/`False`, null becomes
/// `None`, numbers use their JSON display and arrays/objects are written as
/// compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Normalize metadata into string keys mapped to string values
///
/// Absent metadata normalizes to an empty map. Never fails.
pub fn normalize(metadata: Option<&Metadata>) -> NormalizedMetadata {
    metadata
        .map(|entries| {
            entries
                .iter()
                .map(|(key, value)| (key.clone(), stringify(value)))
                .collect()
        })
        .unwrap_or_default()
}
