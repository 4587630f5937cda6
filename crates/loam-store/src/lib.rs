//! Content-addressed object store for Loam.
//!
//! Every persistable entity is a [`Storable`]: a typed body plus a
//! [`StorableHeader`] carrying tags, references to other entities, key
//! references, signatures and a creation timestamp. Its identity is the
//! [`Fingerprint`](loam_types::Fingerprint) of its canonical literal.
//!
//! # Storage
//!
//! [`ObjectStore`] writes object graphs bottom-up into an [`AtomBackend`] and
//! reads them back as fully linked graphs. Atoms are indexed by type and by
//! tag, ordered by creation or arrival time.
//!
//! - [`InMemoryBackend`] -- map-based backend for tests and embedding
//!
//! # Loading rules
//!
//! 1. A reference is resolved locally first, then from the caller's
//!    [`ExternalPool`].
//! 2. A fingerprint met again among its own ancestors is a cycle.
//! 3. Pooled literals must hash to the fingerprint they were offered under
//!    and carry valid signatures from every claimed and required signer.
//! 4. A key that cannot be resolved is kept by fingerprint only (elided).
//! 5. Saved objects are never rewritten.

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod header;
pub mod literal;
pub mod loader;
pub mod memory;
pub mod storable;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{Atom, AtomBackend, Cursor, IndexKey, Order, ScanQuery};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use events::{EventFilter, StoreEvent, Subscription, SubscriptionId};
pub use header::StorableHeader;
pub use literal::{body_field, Literal, RESERVED_FIELDS};
pub use loader::ExternalPool;
pub use memory::InMemoryBackend;
pub use storable::{Fingerprintable, Storable};
pub use store::{ObjectStore, Page, SaveOutcome};
