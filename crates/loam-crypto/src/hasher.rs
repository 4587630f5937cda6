use loam_types::Fingerprint;
use serde_json::Value;

use crate::canonical::canonical_string;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so identical bytes hashed for different purposes never
/// produce the same fingerprint.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for storable objects.
    pub const OBJECT: Self = Self {
        domain: "loam-object-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Fingerprint::from_hash(*hasher.finalize().as_bytes())
    }

    /// Fingerprint of a structured value: the hash of its canonical string.
    pub fn fingerprint(&self, value: &Value) -> Fingerprint {
        self.hash(canonical_string(value).as_bytes())
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_deterministic() {
        let value = json!({"type": "note", "text": "hello"});
        assert_eq!(
            ContentHasher::OBJECT.fingerprint(&value),
            ContentHasher::OBJECT.fingerprint(&value)
        );
    }

    #[test]
    fn fingerprint_ignores_field_order() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": [1, 2], "z": {"q": 0, "p": 1}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"z": {"p": 1, "q": 0}, "y": [1, 2], "x": 1}"#).unwrap();
        assert_eq!(
            ContentHasher::OBJECT.fingerprint(&a),
            ContentHasher::OBJECT.fingerprint(&b)
        );
    }

    #[test]
    fn fingerprint_ignores_own_fingerprint_and_signatures() {
        let bare = json!({"text": "hello"});
        let decorated = json!({"text": "hello", "fingerprint": "00", "signatures": {"a": "b"}});
        assert_eq!(
            ContentHasher::OBJECT.fingerprint(&bare),
            ContentHasher::OBJECT.fingerprint(&decorated)
        );
    }

    #[test]
    fn content_change_changes_fingerprint() {
        let a = json!({"text": "hello"});
        let b = json!({"text": "hellp"});
        assert_ne!(
            ContentHasher::OBJECT.fingerprint(&a),
            ContentHasher::OBJECT.fingerprint(&b)
        );
    }

    #[test]
    fn different_domains_produce_different_hashes() {
        let data = b"same content";
        assert_ne!(ContentHasher::OBJECT.hash(data), ContentHasher::new("custom-v1").hash(data));
    }
}
