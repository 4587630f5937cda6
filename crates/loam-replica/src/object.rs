//! The closed set of storable types.

use std::fmt;
use std::sync::Arc;

use loam_crypto::VerifyingKey;
use loam_store::{body_field, Fingerprintable, Literal, Storable, StorableHeader, StoreError, StoreResult};
use loam_types::Fingerprint;
use serde_json::{Map, Value};

use crate::error::{ReplicaError, ReplicaResult};
use crate::identity::{Identity, KeyPair};
use crate::op::{ControlOp, DataOp, Payload};

/// Every entity a Loam store holds.
#[derive(Clone)]
pub enum Object {
    Identity(Identity),
    KeyPair(KeyPair),
    /// Plain JSON document.
    Value(Document),
    /// Descriptor of a replicated object.
    Replica(ReplicaDescriptor),
    DataOp(DataOp),
    ControlOp(ControlOp),
}

macro_rules! each_variant {
    ($object:expr, $inner:ident => $body:expr) => {
        match $object {
            Object::Identity($inner) => $body,
            Object::KeyPair($inner) => $body,
            Object::Value($inner) => $body,
            Object::Replica($inner) => $body,
            Object::DataOp($inner) => $body,
            Object::ControlOp($inner) => $body,
        }
    };
}

impl Object {
    pub fn as_identity(&self) -> Option<&Identity> {
        match self {
            Self::Identity(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn as_key_pair(&self) -> Option<&KeyPair> {
        match self {
            Self::KeyPair(key_pair) => Some(key_pair),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Value(document) => Some(document),
            _ => None,
        }
    }

    pub fn as_replica(&self) -> Option<&ReplicaDescriptor> {
        match self {
            Self::Replica(descriptor) => Some(descriptor),
            _ => None,
        }
    }

    pub fn as_data_op(&self) -> Option<&DataOp> {
        match self {
            Self::DataOp(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_control_op(&self) -> Option<&ControlOp> {
        match self {
            Self::ControlOp(op) => Some(op),
            _ => None,
        }
    }

    /// A plain JSON document object.
    pub fn document(content: Value) -> Arc<Self> {
        Arc::new(Self::Value(Document::new(content)))
    }
}

impl Storable for Object {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Identity(_) => Identity::TYPE_NAME,
            Self::KeyPair(_) => KeyPair::TYPE_NAME,
            Self::Value(_) => Document::TYPE_NAME,
            Self::Replica(descriptor) => descriptor.kind.type_name(),
            Self::DataOp(_) => DataOp::TYPE_NAME,
            Self::ControlOp(_) => ControlOp::TYPE_NAME,
        }
    }

    fn header(&self) -> &StorableHeader<Self> {
        each_variant!(self, inner => &inner.header)
    }

    fn header_mut(&mut self) -> &mut StorableHeader<Self> {
        each_variant!(self, inner => &mut inner.header)
    }

    fn body(&self) -> Map<String, Value> {
        each_variant!(self, inner => inner.body())
    }

    fn from_literal(literal: &Literal, header: StorableHeader<Self>) -> StoreResult<Self> {
        let object = match literal.type_name.as_str() {
            Identity::TYPE_NAME => Self::Identity(Identity::from_literal(literal, header)?),
            KeyPair::TYPE_NAME => Self::KeyPair(KeyPair::from_literal(literal, header)?),
            Document::TYPE_NAME => Self::Value(Document::from_literal(literal, header)?),
            DataOp::TYPE_NAME => Self::DataOp(DataOp::from_literal(literal, header)?),
            ControlOp::TYPE_NAME => Self::ControlOp(ControlOp::from_literal(literal, header)?),
            other => match ReplicaKind::from_type_name(other) {
                Some(kind) => Self::Replica(ReplicaDescriptor::from_literal(kind, literal, header)?),
                None => return Err(StoreError::UnknownType(other.to_string())),
            },
        };
        Ok(object)
    }

    fn verifying_key(&self) -> Option<VerifyingKey> {
        self.as_identity().map(|identity| identity.public_key().clone())
    }

    fn required_signers(&self) -> Vec<Fingerprint> {
        match self {
            Self::Replica(descriptor) => vec![descriptor.creator],
            Self::DataOp(op) => vec![op.author()],
            Self::ControlOp(op) => vec![op.author()],
            Self::Identity(_) | Self::KeyPair(_) | Self::Value(_) => Vec::new(),
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), self.fingerprint().short_hex())
    }
}

/// A plain JSON document, referenced by object sets, namespaces and
/// references.
#[derive(Clone)]
pub struct Document {
    pub(crate) header: StorableHeader<Object>,
    content: Value,
}

impl Document {
    pub const TYPE_NAME: &'static str = "value";

    pub fn new(content: Value) -> Self {
        Self {
            header: StorableHeader::new(),
            content,
        }
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub(crate) fn body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body_field(&mut body, "content", &self.content);
        body
    }

    pub(crate) fn from_literal(literal: &Literal, header: StorableHeader<Object>) -> StoreResult<Self> {
        Ok(Self {
            header,
            content: literal.field("content")?,
        })
    }
}

/// Which operational type a replicated object wraps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplicaKind {
    Set,
    ObjectSet,
    Singleton,
    Namespace,
    Stream,
    Reference,
}

impl ReplicaKind {
    pub const ALL: [ReplicaKind; 6] = [
        Self::Set,
        Self::ObjectSet,
        Self::Singleton,
        Self::Namespace,
        Self::Stream,
        Self::Reference,
    ];

    /// Literal type name of descriptors of this kind.
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::ObjectSet => "object-set",
            Self::Singleton => "singleton",
            Self::Namespace => "namespace",
            Self::Stream => "stream",
            Self::Reference => "reference",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_name() == name)
    }
}

impl fmt::Display for ReplicaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Identity of a replicated object: its kind, a random replication id and
/// its creator, who signs it.
#[derive(Clone)]
pub struct ReplicaDescriptor {
    pub(crate) header: StorableHeader<Object>,
    kind: ReplicaKind,
    replication_id: String,
    creator: Fingerprint,
}

impl ReplicaDescriptor {
    pub(crate) fn new(kind: ReplicaKind, creator: Arc<Object>) -> Self {
        let mut header = StorableHeader::new();
        let creator = header.add_dependency(creator);
        Self {
            header,
            kind,
            replication_id: hex::encode(rand::random::<[u8; 16]>()),
            creator,
        }
    }

    pub fn kind(&self) -> ReplicaKind {
        self.kind
    }

    pub fn replication_id(&self) -> &str {
        &self.replication_id
    }

    pub fn creator(&self) -> Fingerprint {
        self.creator
    }

    /// Check that the descriptor `own` carries its creator's signature.
    pub(crate) fn verify_creator(&self, own: Fingerprint) -> ReplicaResult<()> {
        let creator = self
            .header
            .dependency(&self.creator)
            .ok_or_else(|| ReplicaError::unauthorized("creator identity not resolved"))?;
        verify_signed_by(&self.header, own, creator)
    }

    pub(crate) fn body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body_field(&mut body, "replication_id", &self.replication_id);
        body_field(&mut body, "creator", &self.creator);
        body
    }

    fn from_literal(kind: ReplicaKind, literal: &Literal, header: StorableHeader<Object>) -> StoreResult<Self> {
        let creator: Fingerprint = literal.field("creator")?;
        if header.dependency(&creator).is_none() {
            return Err(StoreError::Malformed(format!(
                "{kind}: creator {creator} referenced but not a dependency"
            )));
        }
        Ok(Self {
            header,
            kind,
            replication_id: literal.field("replication_id")?,
            creator,
        })
    }
}

/// Check that the object with header `header` and fingerprint `own` is
/// signed by `signer`, which must be an identity.
pub(crate) fn verify_signed_by(
    header: &StorableHeader<Object>,
    own: Fingerprint,
    signer: &Object,
) -> ReplicaResult<()> {
    let signer_fp = signer.fingerprint();
    let key = signer
        .verifying_key()
        .ok_or_else(|| ReplicaError::unauthorized(format!("{signer_fp} is not an identity")))?;
    let signature = header
        .signature(&signer_fp)
        .ok_or_else(|| ReplicaError::unauthorized(format!("{own} is not signed by {signer_fp}")))?;
    key.verify_fingerprint(&own, signature)
        .map_err(|_| ReplicaError::unauthorized(format!("bad signature by {signer_fp} on {own}")))
}
