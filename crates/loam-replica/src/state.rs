//! In-memory state of each replicated kind.
//!
//! A state folds the decoded payloads of verified data ops. Objects a payload
//! refers to arrive as dependencies of the op and are kept alongside.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use loam_crdt::{OperationalSet, OperationalSingleton, SetOp, SingletonOp};
use loam_types::Fingerprint;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::object::{Object, ReplicaKind};
use crate::op::DataOp;

/// Operational state behind a replicated kind.
pub trait ReplicaState: Default + Send + 'static {
    const KIND: ReplicaKind;

    /// Data op payload.
    type Op: Serialize + DeserializeOwned;

    /// Fold a verified op. `data` gives access to the objects it references.
    fn apply_op(&mut self, op: Self::Op, data: &DataOp);
}

/// Observed-remove set of strings.
#[derive(Debug, Default)]
pub struct SetState {
    pub(crate) set: OperationalSet<String>,
}

impl ReplicaState for SetState {
    const KIND: ReplicaKind = ReplicaKind::Set;
    type Op = SetOp<String>;

    fn apply_op(&mut self, op: Self::Op, _data: &DataOp) {
        self.set.apply(&op);
    }
}

/// Observed-remove set of stored objects, keyed by fingerprint.
#[derive(Debug, Default)]
pub struct ObjectSetState {
    pub(crate) set: OperationalSet<Fingerprint>,
    pub(crate) objects: HashMap<Fingerprint, Arc<Object>>,
}

impl ReplicaState for ObjectSetState {
    const KIND: ReplicaKind = ReplicaKind::ObjectSet;
    type Op = SetOp<Fingerprint>;

    fn apply_op(&mut self, op: Self::Op, data: &DataOp) {
        if let Some(object) = data.header().dependency(&op.element) {
            self.objects
                .entry(op.element)
                .or_insert_with(|| Arc::clone(object));
        }
        self.set.apply(&op);
    }
}

/// Last-writer-wins JSON value.
#[derive(Debug, Default)]
pub struct SingletonState {
    pub(crate) register: OperationalSingleton<Value>,
}

impl ReplicaState for SingletonState {
    const KIND: ReplicaKind = ReplicaKind::Singleton;
    type Op = SingletonOp<Value>;

    fn apply_op(&mut self, op: Self::Op, _data: &DataOp) {
        self.register.apply(&op);
    }
}

/// Last-writer-wins pointer to a stored object.
#[derive(Debug, Default)]
pub struct ReferenceState {
    pub(crate) register: OperationalSingleton<Fingerprint>,
    pub(crate) targets: HashMap<Fingerprint, Arc<Object>>,
}

impl ReplicaState for ReferenceState {
    const KIND: ReplicaKind = ReplicaKind::Reference;
    type Op = SingletonOp<Fingerprint>;

    fn apply_op(&mut self, op: Self::Op, data: &DataOp) {
        if let Some(object) = data.header().dependency(&op.value) {
            self.targets.insert(op.value, Arc::clone(object));
        }
        self.register.apply(&op);
    }
}

/// Binding of one name in a namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceOp {
    pub name: String,
    pub binding: SingletonOp<Fingerprint>,
}

/// Names bound to stored objects, each name a last-writer-wins register.
#[derive(Debug, Default)]
pub struct NamespaceState {
    pub(crate) names: BTreeMap<String, OperationalSingleton<Fingerprint>>,
    pub(crate) objects: HashMap<Fingerprint, Arc<Object>>,
}

impl ReplicaState for NamespaceState {
    const KIND: ReplicaKind = ReplicaKind::Namespace;
    type Op = NamespaceOp;

    fn apply_op(&mut self, op: Self::Op, data: &DataOp) {
        let target = op.binding.value;
        if let Some(object) = data.header().dependency(&target) {
            self.objects.insert(target, Arc::clone(object));
        }
        self.names.entry(op.name).or_default().apply(&op.binding);
    }
}

/// One appended stream entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOp {
    /// Unique, time-ordered entry id.
    pub entry: String,
    pub value: Value,
}

/// Append-only log ordered by entry id.
#[derive(Debug, Default)]
pub struct StreamState {
    pub(crate) entries: BTreeMap<String, Value>,
}

impl ReplicaState for StreamState {
    const KIND: ReplicaKind = ReplicaKind::Stream;
    type Op = StreamOp;

    fn apply_op(&mut self, op: Self::Op, _data: &DataOp) {
        self.entries.entry(op.entry).or_insert(op.value);
    }
}
