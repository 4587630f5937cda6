//! Mutation records and their authorization chain.
//!
//! A [`MetaOp`] names the replicated object it mutates, its author, and the
//! control operation that authorizes the author (absent only for the
//! creator). Data operations carry a kind-specific payload; control
//! operations grant roles.
//!
//! Verification is recursive: an op verifies if its author signed it and
//! either the author created the replicated object, or its authorizing op is
//! a verified grant of the right role to this author on the same object.
//! Everything needed is a dependency of the op, so a loaded op carries its
//! whole chain.

use std::sync::Arc;

use loam_crdt::SetOp;
use loam_store::{body_field, Fingerprintable, Literal, Storable, StorableHeader, StoreError, StoreResult};
use loam_types::Fingerprint;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ReplicaError, ReplicaResult};
use crate::identity::Author;
use crate::object::{verify_signed_by, Object};

/// Roles a control operation can grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlAction {
    AddAdmin,
    AddEmitter,
    /// Add or remove a receiver through a set operation.
    ReceiverSet,
}

/// Payload of a control operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPayload {
    pub action: ControlAction,
    pub target: Fingerprint,
    /// Receiver-set sub-operation; present iff `action` is `ReceiverSet`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux_op: Option<SetOp<Fingerprint>>,
}

/// Payload types of [`MetaOp`].
pub trait Payload: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE_NAME: &'static str;

    /// Role an authorizing op must grant the author.
    fn required_grant(&self) -> ControlAction;

    /// Internal consistency of the payload.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }

    /// Stored object the payload names, which must be a dependency of the op.
    fn referenced(&self) -> Option<Fingerprint> {
        None
    }
}

impl Payload for Value {
    const TYPE_NAME: &'static str = DataOp::TYPE_NAME;

    fn required_grant(&self) -> ControlAction {
        ControlAction::AddEmitter
    }
}

impl Payload for ControlPayload {
    const TYPE_NAME: &'static str = ControlOp::TYPE_NAME;

    fn required_grant(&self) -> ControlAction {
        ControlAction::AddAdmin
    }

    fn check(&self) -> Result<(), String> {
        match (self.action, &self.aux_op) {
            (ControlAction::ReceiverSet, Some(aux)) if aux.element == self.target => Ok(()),
            (ControlAction::ReceiverSet, Some(_)) => Err("receiver-set sub-operation names another identity".into()),
            (ControlAction::ReceiverSet, None) => Err("receiver-set without sub-operation".into()),
            (_, Some(_)) => Err("sub-operation on a non receiver-set grant".into()),
            (_, None) => Ok(()),
        }
    }

    fn referenced(&self) -> Option<Fingerprint> {
        Some(self.target)
    }
}

/// One mutation of a replicated object.
#[derive(Clone)]
pub struct MetaOp<P> {
    pub(crate) header: StorableHeader<Object>,
    replica: Fingerprint,
    author: Fingerprint,
    auth_op: Option<Fingerprint>,
    payload: P,
}

/// Kind-specific mutation.
pub type DataOp = MetaOp<Value>;

/// Role grant.
pub type ControlOp = MetaOp<ControlPayload>;

impl DataOp {
    pub const TYPE_NAME: &'static str = "data-op";
}

impl ControlOp {
    pub const TYPE_NAME: &'static str = "control-op";
}

/// Tag under which every op of a replicated object is indexed.
pub fn replica_tag(replica: &Fingerprint) -> String {
    format!("replica:{}", replica.to_hex())
}

impl<P: Payload> MetaOp<P> {
    /// Build an unsigned op. `extras` are the objects the payload refers to.
    pub(crate) fn new(
        replica: &Arc<Object>,
        author: &Author,
        auth_op: Option<&Arc<Object>>,
        payload: P,
        extras: impl IntoIterator<Item = Arc<Object>>,
    ) -> Self {
        let mut header = StorableHeader::new();
        let replica_fp = header.add_dependency(Arc::clone(replica));
        let author_fp = header.add_dependency(Arc::clone(author.identity()));
        let auth_fp = auth_op.map(|op| header.add_dependency(Arc::clone(op)));
        for extra in extras {
            header.add_dependency(extra);
        }
        header.add_tag(replica_tag(&replica_fp));
        Self {
            header,
            replica: replica_fp,
            author: author_fp,
            auth_op: auth_fp,
            payload,
        }
    }

    pub fn replica(&self) -> Fingerprint {
        self.replica
    }

    pub fn author(&self) -> Fingerprint {
        self.author
    }

    pub fn auth_op(&self) -> Option<Fingerprint> {
        self.auth_op
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn header(&self) -> &StorableHeader<Object> {
        &self.header
    }

    /// The resolved authorizing op, if any.
    pub fn auth_op_object(&self) -> Option<&Arc<Object>> {
        self.auth_op.and_then(|fp| self.header.dependency(&fp))
    }

    /// Verify the op whose fingerprint is `own`.
    pub(crate) fn verify_as(&self, own: Fingerprint) -> ReplicaResult<()> {
        self.payload.check().map_err(ReplicaError::Malformed)?;

        let author = self
            .header
            .dependency(&self.author)
            .ok_or_else(|| ReplicaError::unauthorized("author identity not resolved"))?;
        verify_signed_by(&self.header, own, author)?;

        let replica_object = self
            .header
            .dependency(&self.replica)
            .ok_or_else(|| ReplicaError::unauthorized("replica not resolved"))?;
        let replica = replica_object
            .as_replica()
            .ok_or(ReplicaError::NotAReplica(self.replica))?;

        if self.author == replica.creator() {
            if self.auth_op.is_some() {
                return Err(ReplicaError::unauthorized(format!(
                    "creator of {} cites a grant",
                    self.replica
                )));
            }
            return replica.verify_creator(self.replica);
        }
        let Some(auth_fp) = self.auth_op else {
            return Err(ReplicaError::unauthorized(format!(
                "{} acted on {} without a grant",
                self.author, self.replica
            )));
        };

        let grant = self
            .header
            .dependency(&auth_fp)
            .and_then(|object| object.as_control_op())
            .ok_or_else(|| ReplicaError::unauthorized(format!("{auth_fp} is not a control op")))?;
        if grant.replica != self.replica {
            return Err(ReplicaError::unauthorized("grant is for another replica"));
        }
        if grant.payload.target != self.author {
            return Err(ReplicaError::unauthorized("grant names another identity"));
        }
        let required = self.payload.required_grant();
        if grant.payload.action != required {
            return Err(ReplicaError::unauthorized(format!(
                "grant is {:?}, {required:?} required",
                grant.payload.action
            )));
        }
        grant.verify_as(auth_fp)
    }

    pub(crate) fn body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body_field(&mut body, "replica", &self.replica);
        body_field(&mut body, "author", &self.author);
        body_field(&mut body, "auth_op", &self.auth_op);
        body_field(&mut body, "payload", &self.payload);
        body
    }

    pub(crate) fn from_literal(literal: &Literal, header: StorableHeader<Object>) -> StoreResult<Self> {
        let op = Self {
            header,
            replica: literal.field("replica")?,
            author: literal.field("author")?,
            auth_op: literal.optional_field("auth_op")?,
            payload: literal.field("payload")?,
        };
        let referenced = [Some(op.replica), Some(op.author), op.auth_op, op.payload.referenced()];
        if let Some(fp) = referenced
            .into_iter()
            .flatten()
            .find(|fp| op.header.dependency(fp).is_none())
        {
            return Err(StoreError::Malformed(format!(
                "{}: {fp} referenced but not a dependency",
                P::TYPE_NAME
            )));
        }
        Ok(op)
    }
}

impl Object {
    /// Verify a data or control op. Any other object fails.
    pub fn verify(&self) -> ReplicaResult<()> {
        let own = self.fingerprint();
        match self {
            Self::DataOp(op) => op.verify_as(own),
            Self::ControlOp(op) => op.verify_as(own),
            _ => Err(ReplicaError::Malformed(format!("{} is not an operation", self.type_name()))),
        }
    }
}
