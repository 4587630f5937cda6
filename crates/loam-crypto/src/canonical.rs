//! Canonical serialization of structured values.
//!
//! Objects are written as `{key:value,...}` with keys sorted, arrays keep
//! their order, and scalars use their JSON form. The output depends only on
//! the logical content, never on field insertion order, so any two
//! processes produce identical bytes for identical values.

use serde_json::{Map, Value};

/// Top-level fields that never contribute to a fingerprint.
///
/// `fingerprint` would make the hash depend on itself, and `signatures` are
/// made over the fingerprint.
pub const EXCLUDED_FIELDS: [&str; 2] = ["fingerprint", "signatures"];

/// Canonical string for `value`, with [`EXCLUDED_FIELDS`] dropped from the
/// top-level object.
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    match value {
        Value::Object(map) => write_object(&mut out, map, &EXCLUDED_FIELDS),
        other => write_value(&mut out, other),
    }
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => write_object(out, map, &[]),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        // Null, booleans, numbers and escaped strings.
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_object(out: &mut String, map: &Map<String, Value>, excluded: &[&str]) {
    let mut entries: Vec<(&String, &Value)> = map
        .iter()
        .filter(|(k, _)| !excluded.contains(&k.as_str()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_value(out, value);
    }
    out.push('}');
}
