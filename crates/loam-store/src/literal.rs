//! The serialized form of a storable entity.
//!
//! Wire layout:
//!
//! ```text
//! { type, ...type-specific fields..., tags: [sorted], dependencies: [sorted],
//!   keys: [sorted], timestamp, signatures: { signer: signature } }
//! ```
//!
//! Dependencies and keys travel as fingerprints only; the loader turns them
//! back into live references.

use std::collections::{BTreeMap, BTreeSet};

use loam_crypto::{ContentHasher, Signature};
use loam_types::{Fingerprint, UniqueTimestamp};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};

const TYPE: &str = "type";
const TAGS: &str = "tags";
const DEPENDENCIES: &str = "dependencies";
const KEYS: &str = "keys";
const TIMESTAMP: &str = "timestamp";
const SIGNATURES: &str = "signatures";
const FINGERPRINT: &str = "fingerprint";

/// Field names a type-specific body may not use.
pub const RESERVED_FIELDS: [&str; 7] =
    [TYPE, TAGS, DEPENDENCIES, KEYS, TIMESTAMP, SIGNATURES, FINGERPRINT];

/// Decoded literal of one storable entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Literal {
    pub type_name: String,
    /// Type-specific fields.
    pub body: Map<String, Value>,
    pub tags: BTreeSet<String>,
    pub dependencies: BTreeSet<Fingerprint>,
    pub keys: BTreeSet<Fingerprint>,
    pub timestamp: UniqueTimestamp,
    pub signatures: BTreeMap<Fingerprint, Signature>,
}

impl Literal {
    /// Flatten into the wire layout.
    pub fn to_value(&self) -> Value {
        let mut map = self.body.clone();
        map.insert(TYPE.into(), Value::String(self.type_name.clone()));
        map.insert(
            TAGS.into(),
            Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
        );
        map.insert(DEPENDENCIES.into(), fingerprint_array(&self.dependencies));
        map.insert(KEYS.into(), fingerprint_array(&self.keys));
        map.insert(TIMESTAMP.into(), Value::String(self.timestamp.to_string()));
        map.insert(
            SIGNATURES.into(),
            Value::Object(
                self.signatures
                    .iter()
                    .map(|(signer, sig)| (signer.to_hex(), Value::String(sig.to_hex())))
                    .collect(),
            ),
        );
        Value::Object(map)
    }

    /// Decode the wire layout. Unknown fields are kept in the body.
    pub fn from_value(value: Value) -> StoreResult<Self> {
        let Value::Object(mut map) = value else {
            return Err(StoreError::malformed("literal is not an object"));
        };
        map.remove(FINGERPRINT);

        let type_name = match map.remove(TYPE) {
            Some(Value::String(s)) => s,
            _ => return Err(StoreError::malformed("missing type")),
        };
        let timestamp = match map.remove(TIMESTAMP) {
            Some(Value::String(s)) => {
                UniqueTimestamp::parse(&s).map_err(StoreError::malformed)?
            }
            _ => return Err(StoreError::malformed("missing timestamp")),
        };

        let tags = match map.remove(TAGS) {
            Some(v) => serde_json::from_value(v).map_err(StoreError::malformed)?,
            None => BTreeSet::new(),
        };
        let dependencies = parse_fingerprints(map.remove(DEPENDENCIES))?;
        let keys = parse_fingerprints(map.remove(KEYS))?;

        let mut signatures = BTreeMap::new();
        match map.remove(SIGNATURES) {
            Some(Value::Object(sigs)) => {
                for (signer, sig) in sigs {
                    let signer = Fingerprint::from_hex(&signer).map_err(StoreError::malformed)?;
                    let Value::String(sig) = sig else {
                        return Err(StoreError::malformed("signature is not a string"));
                    };
                    let sig = Signature::from_hex(&sig).map_err(StoreError::malformed)?;
                    signatures.insert(signer, sig);
                }
            }
            None => {}
            Some(_) => return Err(StoreError::malformed("signatures is not an object")),
        }

        Ok(Self {
            type_name,
            body: map,
            tags,
            dependencies,
            keys,
            timestamp,
            signatures,
        })
    }

    /// Serialized JSON text.
    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    /// Parse serialized JSON text.
    pub fn parse(text: &str) -> StoreResult<Self> {
        let value: Value = serde_json::from_str(text).map_err(StoreError::malformed)?;
        Self::from_value(value)
    }

    /// Content fingerprint. Signatures are excluded.
    pub fn fingerprint(&self) -> Fingerprint {
        ContentHasher::OBJECT.fingerprint(&self.to_value())
    }

    /// Every fingerprint this literal references, dependencies first.
    pub fn references(&self) -> impl Iterator<Item = &Fingerprint> {
        self.dependencies.iter().chain(self.keys.iter())
    }

    /// Decode a required body field.
    pub fn field<T: DeserializeOwned>(&self, name: &str) -> StoreResult<T> {
        let value = self
            .body
            .get(name)
            .ok_or_else(|| StoreError::Malformed(format!("{}: missing field {name}", self.type_name)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| StoreError::Malformed(format!("{}: field {name}: {e}", self.type_name)))
    }

    /// Decode an optional body field; `null` and absence both yield `None`.
    pub fn optional_field<T: DeserializeOwned>(&self, name: &str) -> StoreResult<Option<T>> {
        match self.body.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.field(name).map(Some),
        }
    }
}

/// Helper for building literal bodies.
pub fn body_field<T: Serialize>(body: &mut Map<String, Value>, name: &str, value: &T) {
    // Serializing plain data (strings, fingerprints, derive(Serialize) structs
    // of those) into a Value cannot fail.
    let value = serde_json::to_value(value).unwrap_or(Value::Null);
    body.insert(name.to_string(), value);
}

fn fingerprint_array(set: &BTreeSet<Fingerprint>) -> Value {
    Value::Array(set.iter().map(|fp| Value::String(fp.to_hex())).collect())
}

fn parse_fingerprints(value: Option<Value>) -> StoreResult<BTreeSet<Fingerprint>> {
    match value {
        None => Ok(BTreeSet::new()),
        Some(v) => serde_json::from_value(v).map_err(StoreError::malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_crypto::SigningKey;
    use serde_json::json;

    fn sample() -> Literal {
        let mut body = Map::new();
        body.insert("text".into(), json!("hello"));
        Literal {
            type_name: "note".into(),
            body,
            tags: ["b".to_string(), "a".to_string()].into_iter().collect(),
            dependencies: [Fingerprint::from_bytes(b"dep")].into_iter().collect(),
            keys: BTreeSet::new(),
            timestamp: UniqueTimestamp::from_parts(1, 2),
            signatures: BTreeMap::new(),
        }
    }

    #[test]
    fn json_roundtrip() {
        let literal = sample();
        let parsed = Literal::parse(&literal.to_json()).unwrap();
        assert_eq!(parsed, literal);
    }

    #[test]
    fn tags_are_sorted_on_the_wire() {
        let value = sample().to_value();
        assert_eq!(value["tags"], json!(["a", "b"]));
        assert_eq!(value["type"], json!("note"));
    }

    #[test]
    fn signatures_do_not_change_fingerprint() {
        let mut literal = sample();
        let before = literal.fingerprint();
        let key = SigningKey::generate();
        literal
            .signatures
            .insert(Fingerprint::from_bytes(b"signer"), key.sign_fingerprint(&before));
        assert_eq!(literal.fingerprint(), before);
        let parsed = Literal::parse(&literal.to_json()).unwrap();
        assert_eq!(parsed.signatures.len(), 1);
    }

    #[test]
    fn body_change_changes_fingerprint() {
        let mut literal = sample();
        let before = literal.fingerprint();
        literal.body.insert("text".into(), json!("hellp"));
        assert_ne!(literal.fingerprint(), before);
    }

    #[test]
    fn missing_type_is_malformed() {
        let err = Literal::parse(r#"{"timestamp": "T0000000000010000000000000002"}"#).unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn field_helpers() {
        let literal = sample();
        let text: String = literal.field("text").unwrap();
        assert_eq!(text, "hello");
        assert!(literal.optional_field::<String>("absent").unwrap().is_none());
        assert!(literal.field::<String>("absent").is_err());
    }
}
