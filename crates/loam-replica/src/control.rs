use std::collections::BTreeMap;
use std::sync::Arc;

use loam_crdt::{OperationalSet, SetChange};
use loam_types::Fingerprint;
use tracing::debug;

use crate::object::Object;
use crate::op::{ControlAction, ControlOp};

/// Why an identity holds a role.
#[derive(Clone, Debug)]
pub enum Authority {
    /// The identity created the replicated object.
    Creator,
    /// The identity was granted the role by this control op.
    Granted(Arc<Object>),
}

impl Authority {
    /// The op to cite as `auth_op`.
    pub fn grant(&self) -> Option<&Arc<Object>> {
        match self {
            Self::Creator => None,
            Self::Granted(op) => Some(op),
        }
    }
}

/// Role registry of one replicated object, folded from verified control ops.
///
/// The creator is an implicit admin and emitter. The first grant seen for an
/// identity is kept so the identity can cite it when it acts.
#[derive(Debug)]
pub struct ReplicaControl {
    creator: Fingerprint,
    admins: BTreeMap<Fingerprint, Arc<Object>>,
    emitters: BTreeMap<Fingerprint, Arc<Object>>,
    receivers: OperationalSet<Fingerprint>,
}

impl ReplicaControl {
    pub fn new(creator: Fingerprint) -> Self {
        Self {
            creator,
            admins: BTreeMap::new(),
            emitters: BTreeMap::new(),
            receivers: OperationalSet::new(),
        }
    }

    pub fn creator(&self) -> Fingerprint {
        self.creator
    }

    /// Fold a verified control op. `object` is the op's stored form.
    pub(crate) fn apply(&mut self, op: &ControlOp, object: &Arc<Object>) {
        let payload = op.payload();
        let target = payload.target;
        match payload.action {
            ControlAction::AddAdmin => {
                self.admins.entry(target).or_insert_with(|| Arc::clone(object));
            }
            ControlAction::AddEmitter => {
                self.emitters.entry(target).or_insert_with(|| Arc::clone(object));
            }
            ControlAction::ReceiverSet => {
                if let Some(change) = payload.aux_op.as_ref().and_then(|aux| self.receivers.apply(aux)) {
                    match change {
                        SetChange::Added(r) => debug!(receiver = %r.short_hex(), "receiver added"),
                        SetChange::Removed(r) => debug!(receiver = %r.short_hex(), "receiver removed"),
                    }
                }
            }
        }
    }

    pub fn admin_authority(&self, identity: &Fingerprint) -> Option<Authority> {
        if *identity == self.creator {
            return Some(Authority::Creator);
        }
        self.admins.get(identity).cloned().map(Authority::Granted)
    }

    pub fn emit_authority(&self, identity: &Fingerprint) -> Option<Authority> {
        if *identity == self.creator {
            return Some(Authority::Creator);
        }
        self.emitters.get(identity).cloned().map(Authority::Granted)
    }

    pub fn is_admin(&self, identity: &Fingerprint) -> bool {
        self.admin_authority(identity).is_some()
    }

    pub fn is_emitter(&self, identity: &Fingerprint) -> bool {
        self.emit_authority(identity).is_some()
    }

    pub fn is_receiver(&self, identity: &Fingerprint) -> bool {
        self.receivers.has(identity)
    }

    /// Admins other than the creator.
    pub fn admins(&self) -> impl Iterator<Item = &Fingerprint> {
        self.admins.keys()
    }

    /// Emitters other than the creator.
    pub fn emitters(&self) -> impl Iterator<Item = &Fingerprint> {
        self.emitters.keys()
    }

    pub fn receivers(&self) -> impl Iterator<Item = &Fingerprint> {
        self.receivers.values()
    }

    pub(crate) fn receiver_set(&self) -> &OperationalSet<Fingerprint> {
        &self.receivers
    }
}
