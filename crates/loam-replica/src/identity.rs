//! Identities and the key pairs behind them.
//!
//! An [`Identity`] publishes an Ed25519 public key and references its
//! [`KeyPair`] as a *key*: peers that only know the identity see the key pair
//! elided. Identities sign themselves on creation.

use std::sync::Arc;

use loam_crypto::{SigningKey, VerifyingKey};
use loam_store::{body_field, Fingerprintable, Literal, Storable, StorableHeader, StoreError, StoreResult};
use loam_types::Fingerprint;
use serde_json::{Map, Value};

use crate::error::{ReplicaError, ReplicaResult};
use crate::object::Object;

/// Public identity of a peer or user.
#[derive(Clone)]
pub struct Identity {
    pub(crate) header: StorableHeader<Object>,
    public_key: VerifyingKey,
}

impl Identity {
    pub const TYPE_NAME: &'static str = "identity";

    fn new(public_key: VerifyingKey, key_pair: Arc<Object>) -> Self {
        let mut header = StorableHeader::new();
        header.add_key(key_pair);
        Self { header, public_key }
    }

    pub fn public_key(&self) -> &VerifyingKey {
        &self.public_key
    }

    /// The held key pair matching the public key, unless elided.
    pub fn key_pair(&self) -> Option<&KeyPair> {
        self.header
            .keys()
            .values()
            .flatten()
            .filter_map(|key| key.as_key_pair())
            .find(|kp| kp.signing_key().verifying_key() == self.public_key)
    }

    pub(crate) fn body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body_field(&mut body, "public_key", &self.public_key.to_hex());
        body
    }

    pub(crate) fn from_literal(literal: &Literal, header: StorableHeader<Object>) -> StoreResult<Self> {
        let hex: String = literal.field("public_key")?;
        let public_key = VerifyingKey::from_hex(&hex)
            .map_err(|e| StoreError::Malformed(format!("identity public key: {e}")))?;
        Ok(Self { header, public_key })
    }
}

/// Private key material of an identity. Never leaves the local store.
#[derive(Clone)]
pub struct KeyPair {
    pub(crate) header: StorableHeader<Object>,
    secret: SigningKey,
}

impl KeyPair {
    pub const TYPE_NAME: &'static str = "keypair";

    fn new(secret: SigningKey) -> Self {
        Self {
            header: StorableHeader::new(),
            secret,
        }
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.secret
    }

    pub(crate) fn body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body_field(&mut body, "secret", &self.secret.to_hex());
        body
    }

    pub(crate) fn from_literal(literal: &Literal, header: StorableHeader<Object>) -> StoreResult<Self> {
        let hex: String = literal.field("secret")?;
        let secret = SigningKey::from_hex(&hex)
            .map_err(|e| StoreError::Malformed(format!("key pair secret: {e}")))?;
        Ok(Self { header, secret })
    }
}

/// An identity together with the key that signs for it.
#[derive(Clone)]
pub struct Author {
    identity: Arc<Object>,
    key: SigningKey,
}

impl Author {
    /// Mint a fresh key pair and a self-signed identity for it.
    pub fn generate() -> Self {
        let key = SigningKey::generate();
        let key_pair = Arc::new(Object::KeyPair(KeyPair::new(key.clone())));
        let mut identity = Object::Identity(Identity::new(key.verifying_key(), key_pair));
        let fingerprint = identity.fingerprint();
        identity
            .header_mut()
            .add_signature(fingerprint, key.sign_fingerprint(&fingerprint));
        Self {
            identity: Arc::new(identity),
            key,
        }
    }

    /// Rebuild an author from a stored identity whose key pair is held.
    pub fn from_identity(identity: Arc<Object>) -> ReplicaResult<Self> {
        let fingerprint = identity.fingerprint();
        let key = identity
            .as_identity()
            .ok_or_else(|| ReplicaError::Malformed(format!("{fingerprint} is not an identity")))?
            .key_pair()
            .ok_or(ReplicaError::MissingKey(fingerprint))?
            .signing_key()
            .clone();
        Ok(Self { identity, key })
    }

    pub fn identity(&self) -> &Arc<Object> {
        &self.identity
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.identity.fingerprint()
    }

    /// Sign `object`'s current fingerprint as this author.
    pub fn sign(&self, object: &mut Object) {
        let fingerprint = object.fingerprint();
        object
            .header_mut()
            .add_signature(self.fingerprint(), self.key.sign_fingerprint(&fingerprint));
    }
}

impl std::fmt::Debug for Author {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Author")
            .field("identity", &self.fingerprint())
            .finish_non_exhaustive()
    }
}
