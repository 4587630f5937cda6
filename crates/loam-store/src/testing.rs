//! A minimal storable type for exercising the store.

use std::sync::Arc;

use loam_crypto::{SigningKey, VerifyingKey};
use loam_types::{Fingerprint, UniqueTimestamp};
use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};
use crate::header::StorableHeader;
use crate::literal::{body_field, Literal};
use crate::storable::{Fingerprintable, Storable};

/// A text note. Notes holding a public key act as signers ("signer" type);
/// a note with an author must carry that author's signature.
#[derive(Clone)]
pub(crate) struct Note {
    header: StorableHeader<Note>,
    pub text: String,
    pub key: Option<VerifyingKey>,
    pub author: Option<Fingerprint>,
}

impl Note {
    pub fn new(text: &str) -> Self {
        Self::at(text, UniqueTimestamp::now())
    }

    pub fn at(text: &str, timestamp: UniqueTimestamp) -> Self {
        Self {
            header: StorableHeader::with_timestamp(timestamp),
            text: text.to_string(),
            key: None,
            author: None,
        }
    }

    /// A self-signed signer note for `key`.
    pub fn signer(text: &str, key: &SigningKey) -> Self {
        let mut note = Self::new(text);
        note.key = Some(key.verifying_key());
        let fingerprint = note.fingerprint();
        note.sign(fingerprint, key);
        note
    }

    pub fn with_dependency(mut self, dependency: Arc<Note>) -> Self {
        self.header.add_dependency(dependency);
        self
    }

    pub fn with_key(mut self, key: Arc<Note>) -> Self {
        self.header.add_key(key);
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.header.add_tag(tag);
        self
    }

    pub fn with_author(mut self, author: Arc<Note>) -> Self {
        let fingerprint = self.header.add_dependency(author);
        self.author = Some(fingerprint);
        self.header.invalidate();
        self
    }

    pub fn sign(&mut self, signer: Fingerprint, key: &SigningKey) {
        let signature = key.sign_fingerprint(&self.fingerprint());
        self.header.add_signature(signer, signature);
    }
}

impl Storable for Note {
    fn type_name(&self) -> &'static str {
        if self.key.is_some() {
            "signer"
        } else {
            "note"
        }
    }

    fn header(&self) -> &StorableHeader<Self> {
        &self.header
    }

    fn header_mut(&mut self) -> &mut StorableHeader<Self> {
        &mut self.header
    }

    fn body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body_field(&mut body, "text", &self.text);
        if let Some(key) = &self.key {
            body_field(&mut body, "public_key", &key.to_hex());
        }
        if let Some(author) = &self.author {
            body_field(&mut body, "author", author);
        }
        body
    }

    fn from_literal(literal: &Literal, header: StorableHeader<Self>) -> StoreResult<Self> {
        if literal.type_name != "note" && literal.type_name != "signer" {
            return Err(StoreError::UnknownType(literal.type_name.clone()));
        }
        let key = literal
            .optional_field::<String>("public_key")?
            .map(|hex| VerifyingKey::from_hex(&hex))
            .transpose()
            .map_err(StoreError::malformed)?;
        Ok(Self {
            header,
            text: literal.field("text")?,
            key,
            author: literal.optional_field("author")?,
        })
    }

    fn verifying_key(&self) -> Option<VerifyingKey> {
        self.key.clone()
    }

    fn required_signers(&self) -> Vec<Fingerprint> {
        self.author.into_iter().collect()
    }
}

impl std::fmt::Debug for Note {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Note")
            .field("text", &self.text)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}
