//! Metadata sanitization.
//!
//! Vector stores only accept primitive metadata values. Strings, integers,
//! floats and booleans are kept in their original key order; lists,
//! objects and nulls are dropped without error.

use serde_json::Value;

use crate::models::{Metadata, MetadataValue, RawMetadata};

/// Keep only primitive-valued entries of `raw`.
///
/// Never fails. Integers that do not fit in `i64` are kept as floats.
pub fn sanitize_metadata(raw: &RawMetadata) -> Metadata {
    let mut out = Metadata::new();
    for (key, value) in raw {
        if let Some(v) = primitive(value) {
            out.insert(key.clone(), v);
        }
    }
    out
}

fn primitive(value: &Value) -> Option<MetadataValue> {
    match value {
        Value::String(s) => Some(MetadataValue::String(s.clone())),
        Value::Bool(b) => Some(MetadataValue::Bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(MetadataValue::Integer(i))
            } else {
                n.as_f64().map(MetadataValue::Float)
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
