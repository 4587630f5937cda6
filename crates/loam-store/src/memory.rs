use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::RwLock;

use loam_types::Fingerprint;

use crate::backend::{Atom, AtomBackend, Cursor, IndexKey, Order, ScanQuery};
use crate::error::StoreResult;

type Index = BTreeMap<IndexKey, BTreeSet<Cursor>>;

#[derive(Default)]
struct MemoryState {
    atoms: HashMap<Fingerprint, Atom>,
    by_created: Index,
    by_received: Index,
}

/// In-memory, map-based atom backend.
///
/// Intended for tests and embedding. All atoms are held behind a `RwLock`
/// for safe concurrent access. Atoms are cloned on read/write.
pub struct InMemoryBackend {
    state: RwLock<MemoryState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn index_keys(atom: &Atom) -> impl Iterator<Item = IndexKey> + '_ {
    std::iter::once(IndexKey::Type(atom.type_name.clone()))
        .chain(atom.tags.iter().cloned().map(IndexKey::Tag))
}

impl AtomBackend for InMemoryBackend {
    fn get(&self, fingerprint: &Fingerprint) -> StoreResult<Option<Atom>> {
        let state = self.state.read().expect("backend lock poisoned");
        Ok(state.atoms.get(fingerprint).cloned())
    }

    fn put(&self, atom: Atom) -> StoreResult<bool> {
        let mut state = self.state.write().expect("backend lock poisoned");
        // Content addressing: the same fingerprint always maps to the same
        // content, so the first write wins.
        if state.atoms.contains_key(&atom.fingerprint) {
            return Ok(false);
        }
        for key in index_keys(&atom) {
            state.by_created.entry(key.clone()).or_default().insert(Cursor {
                timestamp: atom.created.clone(),
                fingerprint: atom.fingerprint,
            });
            state.by_received.entry(key).or_default().insert(Cursor {
                timestamp: atom.saved.clone(),
                fingerprint: atom.fingerprint,
            });
        }
        state.atoms.insert(atom.fingerprint, atom);
        Ok(true)
    }

    fn contains(&self, fingerprint: &Fingerprint) -> StoreResult<bool> {
        let state = self.state.read().expect("backend lock poisoned");
        Ok(state.atoms.contains_key(fingerprint))
    }

    fn scan(&self, index: &IndexKey, query: &ScanQuery) -> StoreResult<Vec<Cursor>> {
        let state = self.state.read().expect("backend lock poisoned");
        let indices = if query.use_recv_time {
            &state.by_received
        } else {
            &state.by_created
        };
        let Some(entries) = indices.get(index) else {
            return Ok(Vec::new());
        };
        let limit = query.limit.unwrap_or(usize::MAX);

        let cursors = match (query.order, &query.start_after) {
            (Order::Ascending, None) => entries.iter().take(limit).cloned().collect(),
            (Order::Ascending, Some(after)) => entries
                .range((Bound::Excluded(after), Bound::Unbounded))
                .take(limit)
                .cloned()
                .collect(),
            (Order::Descending, None) => entries.iter().rev().take(limit).cloned().collect(),
            (Order::Descending, Some(after)) => entries
                .range((Bound::Unbounded, Bound::Excluded(after)))
                .rev()
                .take(limit)
                .cloned()
                .collect(),
        };
        Ok(cursors)
    }

    fn len(&self) -> StoreResult<usize> {
        let state = self.state.read().expect("backend lock poisoned");
        Ok(state.atoms.len())
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.state.read().map(|s| s.atoms.len()).unwrap_or_default();
        f.debug_struct("InMemoryBackend")
            .field("atom_count", &count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_types::UniqueTimestamp;

    fn atom(name: &str, created: u64, saved: u64, tags: &[&str]) -> Atom {
        Atom {
            fingerprint: Fingerprint::from_bytes(name.as_bytes()),
            type_name: "note".into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created: UniqueTimestamp::from_parts(created, 0),
            saved: UniqueTimestamp::from_parts(saved, 0),
            literal: format!("{{\"name\":\"{name}\"}}"),
        }
    }

    fn names(backend: &InMemoryBackend, cursors: &[Cursor]) -> Vec<String> {
        cursors
            .iter()
            .map(|c| backend.get(&c.fingerprint).unwrap().unwrap().literal)
            .collect()
    }

    #[test]
    fn put_and_get() {
        let backend = InMemoryBackend::new();
        let a = atom("a", 1, 1, &[]);
        assert!(backend.put(a.clone()).unwrap());
        assert_eq!(backend.get(&a.fingerprint).unwrap(), Some(a.clone()));
        assert!(backend.contains(&a.fingerprint).unwrap());
    }

    #[test]
    fn put_is_idempotent() {
        let backend = InMemoryBackend::new();
        let a = atom("a", 1, 1, &[]);
        assert!(backend.put(a.clone()).unwrap());
        assert!(!backend.put(a).unwrap());
        assert_eq!(backend.len().unwrap(), 1);
    }

    #[test]
    fn missing_atom_reads_none() {
        let backend = InMemoryBackend::new();
        assert!(backend.get(&Fingerprint::from_bytes(b"nope")).unwrap().is_none());
        assert!(backend.is_empty().unwrap());
    }

    #[test]
    fn scan_orders_by_creation_or_arrival() {
        let backend = InMemoryBackend::new();
        // "early" was created first but arrived last.
        backend.put(atom("early", 10, 30, &[])).unwrap();
        backend.put(atom("late", 20, 5, &[])).unwrap();
        let index = IndexKey::Type("note".into());

        let by_created = backend.scan(&index, &ScanQuery::new(Order::Ascending, false)).unwrap();
        assert_eq!(names(&backend, &by_created), vec![r#"{"name":"early"}"#, r#"{"name":"late"}"#]);

        let by_received = backend.scan(&index, &ScanQuery::new(Order::Ascending, true)).unwrap();
        assert_eq!(names(&backend, &by_received), vec![r#"{"name":"late"}"#, r#"{"name":"early"}"#]);
    }

    #[test]
    fn scan_pages_with_cursor_in_both_directions() {
        let backend = InMemoryBackend::new();
        for i in 0..5u64 {
            backend.put(atom(&format!("n{i}"), i, i, &["t"])).unwrap();
        }
        let index = IndexKey::Tag("t".into());

        let first = backend
            .scan(&index, &ScanQuery::new(Order::Ascending, false).with_limit(2))
            .unwrap();
        assert_eq!(first.len(), 2);
        let rest = backend
            .scan(
                &index,
                &ScanQuery::new(Order::Ascending, false).after(first[1].clone()),
            )
            .unwrap();
        assert_eq!(rest.len(), 3);
        assert!(rest.iter().all(|c| c > &first[1]));

        let desc = backend
            .scan(
                &index,
                &ScanQuery::new(Order::Descending, false)
                    .after(rest[1].clone())
                    .with_limit(10),
            )
            .unwrap();
        assert_eq!(desc.len(), 3);
        assert!(desc.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn unknown_index_scans_empty() {
        let backend = InMemoryBackend::new();
        backend.put(atom("a", 1, 1, &["x"])).unwrap();
        let found = backend
            .scan(&IndexKey::Tag("y".into()), &ScanQuery::default())
            .unwrap();
        assert!(found.is_empty());
    }
}
