use std::collections::BTreeSet;

use loam_types::{Fingerprint, UniqueTimestamp};

use crate::error::StoreResult;

/// A single persisted record: the serialized literal plus index metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Atom {
    pub fingerprint: Fingerprint,
    pub type_name: String,
    pub tags: BTreeSet<String>,
    /// Creation timestamp carried by the literal.
    pub created: UniqueTimestamp,
    /// Local arrival timestamp, assigned on first save.
    pub saved: UniqueTimestamp,
    /// Serialized literal.
    pub literal: String,
}

impl Atom {
    /// Timestamp this atom is indexed under.
    pub fn index_timestamp(&self, use_recv_time: bool) -> &UniqueTimestamp {
        if use_recv_time {
            &self.saved
        } else {
            &self.created
        }
    }
}

/// Secondary index an atom can be found under.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexKey {
    Type(String),
    Tag(String),
}

/// Scan direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

/// Position in an index: the index timestamp plus the fingerprint as a
/// tie-break.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub timestamp: UniqueTimestamp,
    pub fingerprint: Fingerprint,
}

/// Range scan parameters.
#[derive(Clone, Debug, Default)]
pub struct ScanQuery {
    pub order: Order,
    /// Order by saved (arrival) time instead of creation time.
    pub use_recv_time: bool,
    /// Resume strictly after this position.
    pub start_after: Option<Cursor>,
    pub limit: Option<usize>,
}

impl ScanQuery {
    pub fn new(order: Order, use_recv_time: bool) -> Self {
        Self {
            order,
            use_recv_time,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after(mut self, cursor: Cursor) -> Self {
        self.start_after = Some(cursor);
        self
    }
}

/// Persistent key-value backend consumed by the object store.
///
/// Implementations must satisfy these invariants:
/// - Atoms are immutable once written; writing an existing fingerprint is a
///   no-op that returns `false`.
/// - Every atom is indexed under its type and each of its tags, by both
///   creation and saved timestamp.
/// - All I/O errors are propagated, never silently ignored.
pub trait AtomBackend: Send + Sync {
    /// Read an atom by fingerprint. `Ok(None)` if absent.
    fn get(&self, fingerprint: &Fingerprint) -> StoreResult<Option<Atom>>;

    /// Write an atom. Returns `true` if it was not present before.
    fn put(&self, atom: Atom) -> StoreResult<bool>;

    fn contains(&self, fingerprint: &Fingerprint) -> StoreResult<bool> {
        Ok(self.get(fingerprint)?.is_some())
    }

    /// Ordered range scan over one secondary index.
    fn scan(&self, index: &IndexKey, query: &ScanQuery) -> StoreResult<Vec<Cursor>>;

    /// Number of atoms stored.
    fn len(&self) -> StoreResult<usize>;

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}
