//! Replicated objects for Loam.
//!
//! # Object model
//!
//! [`Object`] is the closed set of storable types: identities and their key
//! pairs, plain documents, replicated-object descriptors, and the data and
//! control ops that mutate them.
//!
//! # Capabilities
//!
//! Every op names an authorizing control op unless its author created the
//! replicated object. Control ops grant three roles:
//!
//! - admin: may grant roles
//! - emitter: may emit data ops
//! - receiver: entitled to receive ops; kept as an observed-remove set
//!
//! Ops that fail verification are dropped on apply and never retried.
//!
//! # Replication
//!
//! [`Replica`] wraps one operational state. Mutators enqueue signed ops;
//! [`Replica::flush`] stores them, [`Replica::pull`] and store subscriptions
//! fold stored ops in. [`Replicator`] ships ops with their reference graph
//! over a [`Transport`] and admits received graphs only after the store has
//! checked them.

pub mod control;
pub mod error;
pub mod identity;
pub mod object;
pub mod op;
pub mod replica;
pub mod replicator;
pub mod state;
pub mod transport;

pub use control::{Authority, ReplicaControl};
pub use error::{ReplicaError, ReplicaResult};
pub use identity::{Author, Identity, KeyPair};
pub use object::{Document, Object, ReplicaDescriptor, ReplicaKind};
pub use op::{replica_tag, ControlAction, ControlOp, ControlPayload, DataOp, MetaOp, Payload};
pub use replica::{
    Namespace, Replica, ReplicatedObjectSet, ReplicatedReference, ReplicatedSet, ReplicatedSingleton, Stream,
};
pub use replicator::{Bundle, Replicator, ReplicatorConfig};
pub use state::{
    NamespaceOp, NamespaceState, ObjectSetState, ReferenceState, ReplicaState, SetState, SingletonState, StreamOp,
    StreamState,
};
pub use transport::{MemoryNetwork, MemoryTransport, Message, Transport};
