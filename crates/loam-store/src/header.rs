use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

use loam_crypto::Signature;
use loam_types::{Fingerprint, UniqueTimestamp};

use crate::literal::Literal;
use crate::storable::{Fingerprintable, Storable};

/// Identity, references and persistence metadata shared by every storable
/// entity.
///
/// Concrete types embed a header and expose it through [`Storable`]. Every
/// mutator that changes serialized content drops the cached fingerprint;
/// signatures and the saved timestamp are not part of the content.
pub struct StorableHeader<O> {
    fingerprint: OnceLock<Fingerprint>,
    tags: BTreeSet<String>,
    dependencies: BTreeMap<Fingerprint, Arc<O>>,
    /// `None` marks an elided key: only its fingerprint is known.
    keys: BTreeMap<Fingerprint, Option<Arc<O>>>,
    signatures: BTreeMap<Fingerprint, Signature>,
    timestamp: UniqueTimestamp,
    saved_at: OnceLock<UniqueTimestamp>,
}

impl<O> StorableHeader<O> {
    /// Fresh header stamped with the current time.
    pub fn new() -> Self {
        Self::with_timestamp(UniqueTimestamp::now())
    }

    pub fn with_timestamp(timestamp: UniqueTimestamp) -> Self {
        Self {
            fingerprint: OnceLock::new(),
            tags: BTreeSet::new(),
            dependencies: BTreeMap::new(),
            keys: BTreeMap::new(),
            signatures: BTreeMap::new(),
            timestamp,
            saved_at: OnceLock::new(),
        }
    }

    /// Rebuild a header from a decoded literal and its resolved references.
    pub fn from_literal(
        literal: &Literal,
        dependencies: BTreeMap<Fingerprint, Arc<O>>,
        keys: BTreeMap<Fingerprint, Option<Arc<O>>>,
    ) -> Self {
        Self {
            fingerprint: OnceLock::new(),
            tags: literal.tags.clone(),
            dependencies,
            keys,
            signatures: literal.signatures.clone(),
            timestamp: literal.timestamp.clone(),
            saved_at: OnceLock::new(),
        }
    }

    /// Drop the cached fingerprint. Call after any content change.
    ///
    /// Changed content is a different, not yet persisted object, so the
    /// saved timestamp is dropped as well.
    pub fn invalidate(&mut self) {
        self.fingerprint = OnceLock::new();
        self.saved_at = OnceLock::new();
    }

    pub(crate) fn fingerprint_cache(&self) -> &OnceLock<Fingerprint> {
        &self.fingerprint
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        if self.tags.insert(tag.into()) {
            self.invalidate();
        }
    }

    pub fn dependencies(&self) -> &BTreeMap<Fingerprint, Arc<O>> {
        &self.dependencies
    }

    pub fn dependency(&self, fingerprint: &Fingerprint) -> Option<&Arc<O>> {
        self.dependencies.get(fingerprint)
    }

    pub fn keys(&self) -> &BTreeMap<Fingerprint, Option<Arc<O>>> {
        &self.keys
    }

    /// A key body, if held.
    pub fn key(&self, fingerprint: &Fingerprint) -> Option<&Arc<O>> {
        self.keys.get(fingerprint).and_then(Option::as_ref)
    }

    pub fn signatures(&self) -> &BTreeMap<Fingerprint, Signature> {
        &self.signatures
    }

    pub fn signature(&self, signer: &Fingerprint) -> Option<&Signature> {
        self.signatures.get(signer)
    }

    /// Attach a signature over this object's fingerprint.
    pub fn add_signature(&mut self, signer: Fingerprint, signature: Signature) {
        self.signatures.insert(signer, signature);
    }

    /// Creation timestamp.
    pub fn timestamp(&self) -> &UniqueTimestamp {
        &self.timestamp
    }

    /// Local arrival timestamp; present iff the object is in the store.
    pub fn saved_at(&self) -> Option<&UniqueTimestamp> {
        self.saved_at.get()
    }

    pub fn is_saved(&self) -> bool {
        self.saved_at.get().is_some()
    }

    /// Set the saved timestamp. Only the first call has any effect.
    pub fn mark_saved(&self, at: UniqueTimestamp) -> bool {
        self.saved_at.set(at).is_ok()
    }
}

impl<O: Storable> StorableHeader<O> {
    /// Reference another object; returns its fingerprint.
    pub fn add_dependency(&mut self, object: Arc<O>) -> Fingerprint {
        let fingerprint = object.fingerprint();
        self.dependencies.insert(fingerprint, object);
        self.invalidate();
        fingerprint
    }

    /// Reference key material; returns its fingerprint.
    pub fn add_key(&mut self, key: Arc<O>) -> Fingerprint {
        let fingerprint = key.fingerprint();
        self.keys.insert(fingerprint, Some(key));
        self.invalidate();
        fingerprint
    }
}

impl<O> Default for StorableHeader<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> Clone for StorableHeader<O> {
    fn clone(&self) -> Self {
        Self {
            fingerprint: self.fingerprint.clone(),
            tags: self.tags.clone(),
            dependencies: self.dependencies.clone(),
            keys: self.keys.clone(),
            signatures: self.signatures.clone(),
            timestamp: self.timestamp.clone(),
            saved_at: self.saved_at.clone(),
        }
    }
}

impl<O> std::fmt::Debug for StorableHeader<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorableHeader")
            .field("fingerprint", &self.fingerprint.get())
            .field("tags", &self.tags)
            .field("dependencies", &self.dependencies.keys().collect::<Vec<_>>())
            .field("keys", &self.keys.keys().collect::<Vec<_>>())
            .field("signers", &self.signatures.keys().collect::<Vec<_>>())
            .field("timestamp", &self.timestamp)
            .field("saved_at", &self.saved_at.get())
            .finish()
    }
}
