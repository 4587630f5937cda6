//! Replication envelope.
//!
//! A [`Replica`] couples one [`ReplicaState`] with its descriptor, its role
//! registry and a queue of ops not yet flushed to the store. Mutators only
//! enqueue signed ops; state changes when an op is applied, either on
//! [`flush`](Replica::flush), [`pull`](Replica::pull) or from a store
//! subscription.

use std::collections::HashSet;
use std::sync::Arc;

use loam_crdt::SetOp;
use loam_store::{Fingerprintable, ObjectStore, Order, Storable, Subscription};
use loam_types::{Fingerprint, UniqueTimestamp};
use serde_json::Value;
use tracing::{debug, warn};

use crate::control::ReplicaControl;
use crate::error::{ReplicaError, ReplicaResult};
use crate::identity::Author;
use crate::object::{Object, ReplicaDescriptor};
use crate::op::{replica_tag, ControlAction, ControlOp, ControlPayload, DataOp};
use crate::state::{
    NamespaceOp, NamespaceState, ObjectSetState, ReferenceState, ReplicaState, SetState, SingletonState, StreamOp,
    StreamState,
};

pub type ReplicatedSet = Replica<SetState>;
pub type ReplicatedObjectSet = Replica<ObjectSetState>;
pub type ReplicatedSingleton = Replica<SingletonState>;
pub type ReplicatedReference = Replica<ReferenceState>;
pub type Namespace = Replica<NamespaceState>;
pub type Stream = Replica<StreamState>;

/// A replicated object of kind `S`.
pub struct Replica<S> {
    descriptor: Arc<Object>,
    fingerprint: Fingerprint,
    control: ReplicaControl,
    state: S,
    pending: Vec<Arc<Object>>,
    applied: HashSet<Fingerprint>,
    subscription: Option<Subscription<Object>>,
}

impl<S: ReplicaState> Replica<S> {
    /// Create a new replicated object owned by `creator`.
    pub fn create(creator: &Author) -> Self {
        let mut descriptor = Object::Replica(ReplicaDescriptor::new(S::KIND, Arc::clone(creator.identity())));
        creator.sign(&mut descriptor);
        Self::with_descriptor(Arc::new(descriptor), creator.fingerprint())
    }

    /// Open an existing replicated object from its descriptor.
    pub fn open(descriptor: Arc<Object>) -> ReplicaResult<Self> {
        let fingerprint = descriptor.fingerprint();
        let inner = descriptor
            .as_replica()
            .ok_or(ReplicaError::NotAReplica(fingerprint))?;
        if inner.kind() != S::KIND {
            return Err(ReplicaError::WrongKind {
                expected: S::KIND.to_string(),
                found: inner.kind().to_string(),
            });
        }
        inner.verify_creator(fingerprint)?;
        let creator = inner.creator();
        Ok(Self::with_descriptor(descriptor, creator))
    }

    /// Load a descriptor from `store` and open it.
    pub fn load(store: &ObjectStore<Object>, fingerprint: &Fingerprint) -> ReplicaResult<Self> {
        Self::open(store.load(fingerprint)?)
    }

    fn with_descriptor(descriptor: Arc<Object>, creator: Fingerprint) -> Self {
        Self {
            fingerprint: descriptor.fingerprint(),
            descriptor,
            control: ReplicaControl::new(creator),
            state: S::default(),
            pending: Vec::new(),
            applied: HashSet::new(),
            subscription: None,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn descriptor(&self) -> &Arc<Object> {
        &self.descriptor
    }

    pub fn creator(&self) -> Fingerprint {
        self.control.creator()
    }

    pub fn control(&self) -> &ReplicaControl {
        &self.control
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Ops enqueued but not yet flushed.
    pub fn pending(&self) -> &[Arc<Object>] {
        &self.pending
    }

    /// Tag of every op of this object.
    pub fn tag(&self) -> String {
        replica_tag(&self.fingerprint)
    }

    pub fn has_applied(&self, op: &Fingerprint) -> bool {
        self.applied.contains(op)
    }

    // ---------------------------------------------------------------
    // Enqueueing
    // ---------------------------------------------------------------

    fn enqueue(&mut self, mut op: Object, author: &Author) -> Fingerprint {
        author.sign(&mut op);
        let fingerprint = op.fingerprint();
        debug!(op = %fingerprint.short_hex(), replica = %self.fingerprint.short_hex(), kind = op.type_name(), "enqueued op");
        self.pending.push(Arc::new(op));
        fingerprint
    }

    /// Enqueue a data op. `extras` are the stored objects the payload names.
    pub(crate) fn enqueue_data(
        &mut self,
        op: &S::Op,
        extras: Vec<Arc<Object>>,
        author: &Author,
    ) -> ReplicaResult<Fingerprint> {
        let authority = self.control.emit_authority(&author.fingerprint()).ok_or_else(|| {
            ReplicaError::unauthorized(format!("{} may not emit to {}", author.fingerprint(), self.fingerprint))
        })?;
        let payload = serde_json::to_value(op).map_err(|e| ReplicaError::Malformed(e.to_string()))?;
        let data = DataOp::new(&self.descriptor, author, authority.grant(), payload, extras);
        Ok(self.enqueue(Object::DataOp(data), author))
    }

    fn enqueue_control(
        &mut self,
        action: ControlAction,
        target: &Arc<Object>,
        aux_op: Option<SetOp<Fingerprint>>,
        author: &Author,
    ) -> ReplicaResult<Fingerprint> {
        let authority = self.control.admin_authority(&author.fingerprint()).ok_or_else(|| {
            ReplicaError::unauthorized(format!("{} is not an admin of {}", author.fingerprint(), self.fingerprint))
        })?;
        if target.as_identity().is_none() {
            return Err(ReplicaError::Malformed(format!("grant target {target:?} is not an identity")));
        }
        let payload = ControlPayload {
            action,
            target: target.fingerprint(),
            aux_op,
        };
        let control = ControlOp::new(&self.descriptor, author, authority.grant(), payload, [Arc::clone(target)]);
        Ok(self.enqueue(Object::ControlOp(control), author))
    }

    /// Let `target` grant roles.
    pub fn add_admin(&mut self, target: &Arc<Object>, author: &Author) -> ReplicaResult<Fingerprint> {
        self.enqueue_control(ControlAction::AddAdmin, target, None, author)
    }

    /// Let `target` emit data ops.
    pub fn add_emitter(&mut self, target: &Arc<Object>, author: &Author) -> ReplicaResult<Fingerprint> {
        self.enqueue_control(ControlAction::AddEmitter, target, None, author)
    }

    pub fn add_receiver(&mut self, target: &Arc<Object>, author: &Author) -> ReplicaResult<Fingerprint> {
        let aux = self.control.receiver_set().create_add_op(target.fingerprint());
        self.enqueue_control(ControlAction::ReceiverSet, target, Some(aux), author)
    }

    /// Remove `target` as receiver. `None` if it is not one.
    pub fn remove_receiver(&mut self, target: &Arc<Object>, author: &Author) -> ReplicaResult<Option<Fingerprint>> {
        let Some(aux) = self.control.receiver_set().create_remove_op(target.fingerprint()) else {
            return Ok(None);
        };
        self.enqueue_control(ControlAction::ReceiverSet, target, Some(aux), author)
            .map(Some)
    }

    // ---------------------------------------------------------------
    // Applying
    // ---------------------------------------------------------------

    /// Fold an op into the local state. Ops for another object, ops that do
    /// not verify and ops already applied are skipped; returns whether the op
    /// was applied now.
    pub fn apply(&mut self, op: &Arc<Object>) -> bool {
        let fingerprint = op.fingerprint();
        if self.applied.contains(&fingerprint) {
            return false;
        }
        let target = match op.as_ref() {
            Object::DataOp(data) => data.replica(),
            Object::ControlOp(control) => control.replica(),
            _ => return false,
        };
        if target != self.fingerprint {
            return false;
        }
        if let Err(e) = op.verify() {
            warn!(op = %fingerprint.short_hex(), replica = %self.fingerprint.short_hex(), error = %e, "dropping unverifiable op");
            return false;
        }

        match op.as_ref() {
            Object::DataOp(data) => {
                let payload = match serde_json::from_value::<S::Op>(data.payload().clone()) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(op = %fingerprint.short_hex(), error = %e, "dropping op with undecodable payload");
                        return false;
                    }
                };
                self.apply_chain(data.auth_op_object());
                self.state.apply_op(payload, data);
            }
            Object::ControlOp(control) => {
                self.apply_chain(control.auth_op_object());
                self.control.apply(control, op);
            }
            _ => return false,
        }
        self.applied.insert(fingerprint);
        debug!(op = %fingerprint.short_hex(), replica = %self.fingerprint.short_hex(), "applied op");
        true
    }

    /// Fold the grant an applied op cites, so later local ops can cite it too.
    fn apply_chain(&mut self, grant: Option<&Arc<Object>>) {
        if let Some(grant) = grant {
            self.apply(&Arc::clone(grant));
        }
    }

    // ---------------------------------------------------------------
    // Store sync
    // ---------------------------------------------------------------

    /// Persist the descriptor and every pending op, applying each op once it
    /// is stored. Ops that could not be saved stay pending.
    pub fn flush(&mut self, store: &ObjectStore<Object>) -> ReplicaResult<usize> {
        store.save(&self.descriptor)?;
        let pending = std::mem::take(&mut self.pending);
        let mut flushed = 0;
        for (index, op) in pending.iter().enumerate() {
            if let Err(e) = store.save(op) {
                self.pending = pending[index..].to_vec();
                return Err(e.into());
            }
            self.apply(op);
            flushed += 1;
        }
        debug!(replica = %self.fingerprint.short_hex(), flushed, "flushed ops");
        Ok(flushed)
    }

    /// Apply every stored op of this object. Returns how many were new.
    pub fn pull(&mut self, store: &ObjectStore<Object>) -> ReplicaResult<usize> {
        let ops = store.load_all_by_tag(&self.tag(), Order::Ascending, false)?;
        Ok(ops.iter().filter(|op| self.apply(op)).count())
    }

    /// Follow ops saved to `store` from now on. Call [`drain`](Self::drain)
    /// or [`recv`](Self::recv) to apply them.
    pub fn subscribe(&mut self, store: &ObjectStore<Object>) {
        self.subscription = Some(store.subscribe_tag(self.tag()));
    }

    /// Stop following the store.
    pub fn unsubscribe(&mut self, store: &ObjectStore<Object>) {
        if let Some(subscription) = self.subscription.take() {
            store.unsubscribe(subscription.id());
        }
    }

    /// Apply every op delivered by the subscription so far.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.subscription.as_mut().and_then(|sub| sub.try_recv()) {
            if self.apply(&event.object) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for the next op from the subscription and apply it. `None` when
    /// not subscribed or the store is gone.
    pub async fn recv(&mut self) -> Option<bool> {
        let event = self.subscription.as_mut()?.recv().await?;
        Some(self.apply(&event.object))
    }
}

impl<S> std::fmt::Debug for Replica<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("fingerprint", &self.fingerprint)
            .field("pending", &self.pending.len())
            .field("applied", &self.applied.len())
            .finish_non_exhaustive()
    }
}

impl Replica<SetState> {
    pub fn add(&mut self, value: impl Into<String>, author: &Author) -> ReplicaResult<Fingerprint> {
        let op = self.state.set.create_add_op(value.into());
        self.enqueue_data(&op, Vec::new(), author)
    }

    /// `None` if the value is not present.
    pub fn remove(&mut self, value: &str, author: &Author) -> ReplicaResult<Option<Fingerprint>> {
        let Some(op) = self.state.set.create_remove_op(value.to_string()) else {
            return Ok(None);
        };
        self.enqueue_data(&op, Vec::new(), author).map(Some)
    }

    pub fn has(&self, value: &str) -> bool {
        self.state.set.has(&value.to_string())
    }

    pub fn values(&self) -> impl Iterator<Item = &String> {
        self.state.set.values()
    }
}

impl Replica<ObjectSetState> {
    pub fn add(&mut self, object: Arc<Object>, author: &Author) -> ReplicaResult<Fingerprint> {
        let op = self.state.set.create_add_op(object.fingerprint());
        self.enqueue_data(&op, vec![object], author)
    }

    /// `None` if the object is not present.
    pub fn remove(&mut self, object: &Fingerprint, author: &Author) -> ReplicaResult<Option<Fingerprint>> {
        let (Some(op), Some(stored)) = (
            self.state.set.create_remove_op(*object),
            self.state.objects.get(object).cloned(),
        ) else {
            return Ok(None);
        };
        self.enqueue_data(&op, vec![stored], author).map(Some)
    }

    pub fn has(&self, object: &Fingerprint) -> bool {
        self.state.set.has(object)
    }

    /// Present objects, ordered by fingerprint.
    pub fn objects(&self) -> impl Iterator<Item = &Arc<Object>> {
        self.state
            .set
            .values()
            .filter_map(|fp| self.state.objects.get(fp))
    }
}

impl Replica<SingletonState> {
    pub fn set_value(&mut self, value: Value, author: &Author) -> ReplicaResult<Fingerprint> {
        let op = self.state.register.create_set_value_op(value);
        self.enqueue_data(&op, Vec::new(), author)
    }

    pub fn value(&self) -> Option<&Value> {
        self.state.register.value()
    }
}

impl Replica<ReferenceState> {
    pub fn set_target(&mut self, object: Arc<Object>, author: &Author) -> ReplicaResult<Fingerprint> {
        let op = self.state.register.create_set_value_op(object.fingerprint());
        self.enqueue_data(&op, vec![object], author)
    }

    pub fn target(&self) -> Option<&Arc<Object>> {
        self.state
            .register
            .value()
            .and_then(|fp| self.state.targets.get(fp))
    }
}

impl Replica<NamespaceState> {
    /// Bind `name` to `object`, replacing any earlier binding.
    pub fn bind(&mut self, name: &str, object: Arc<Object>, author: &Author) -> ReplicaResult<Fingerprint> {
        let register = self.state.names.get(name).cloned().unwrap_or_default();
        let op = NamespaceOp {
            name: name.to_string(),
            binding: register.create_set_value_op(object.fingerprint()),
        };
        self.enqueue_data(&op, vec![object], author)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Object>> {
        self.state
            .names
            .get(name)
            .and_then(|register| register.value())
            .and_then(|fp| self.state.objects.get(fp))
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.state.names.keys()
    }
}

impl Replica<StreamState> {
    pub fn append(&mut self, value: Value, author: &Author) -> ReplicaResult<Fingerprint> {
        let op = StreamOp {
            entry: UniqueTimestamp::now().to_string(),
            value,
        };
        self.enqueue_data(&op, Vec::new(), author)
    }

    /// Entries in entry-id order.
    pub fn entries(&self) -> impl Iterator<Item = &Value> {
        self.state.entries.values()
    }

    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }
}
