//! Operational CRDT primitives for Loam.
//!
//! Both primitives are driven by explicit operations: a writer *creates* an
//! operation from its current view, ships it, and every replica (the writer
//! included) *applies* it. Application is commutative and idempotent, so
//! replicas that have applied the same operations agree, whatever the order
//! or number of deliveries.
//!
//! - [`OperationalSet`]: observed-remove set over unique instance ids
//! - [`OperationalSingleton`]: last-writer-wins register over [`UniqueCounter`]s
//!
//! Neither type knows about storage, identities or the network.

pub mod counter;
pub mod error;
pub mod set;
pub mod singleton;

pub use counter::UniqueCounter;
pub use error::CrdtError;
pub use set::{OperationalSet, SetAction, SetChange, SetOp};
pub use singleton::{OperationalSingleton, SingletonOp};
