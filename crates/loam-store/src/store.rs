use std::sync::Arc;

use loam_types::{Fingerprint, UniqueTimestamp};
use tracing::{debug, info};

use crate::backend::{Atom, AtomBackend, Cursor, IndexKey, Order, ScanQuery};
use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::events::{EventBus, EventFilter, StoreEvent, Subscription, SubscriptionId};
use crate::loader::{ExternalPool, GraphLoader};
use crate::memory::InMemoryBackend;
use crate::storable::{Fingerprintable, Storable};

/// Result of a [`ObjectStore::save`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The object was written by this call.
    Saved,
    /// The object was already persisted; nothing was written.
    AlreadySaved,
}

/// One page of an index scan.
pub struct Page<O> {
    pub objects: Vec<Arc<O>>,
    /// Position of the last object, for resuming the scan.
    pub last: Option<Cursor>,
}

/// Content-addressed object store over an [`AtomBackend`].
///
/// - `save` is a bottom-up DAG writer: every dependency and held key is
///   persisted before the object that references it.
/// - `load` rebuilds the full reference graph, checking for cycles and, for
///   objects offered through an external pool, tampering and forged
///   signatures.
/// - Saved objects are never rewritten, so racing saves of the same graph
///   are harmless.
pub struct ObjectStore<O> {
    backend: Arc<dyn AtomBackend>,
    events: EventBus<O>,
}

impl<O: Storable + Clone> ObjectStore<O> {
    pub fn new(backend: Arc<dyn AtomBackend>, config: StoreConfig) -> Self {
        info!(event_capacity = config.event_capacity, "object store opened");
        Self {
            backend,
            events: EventBus::new(config.event_capacity),
        }
    }

    /// A store over a fresh [`InMemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()), StoreConfig::default())
    }

    pub fn backend(&self) -> &Arc<dyn AtomBackend> {
        &self.backend
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Persist `object` and everything it references that is not stored yet.
    pub fn save(&self, object: &O) -> StoreResult<SaveOutcome> {
        if object.header().is_saved() {
            return Ok(SaveOutcome::AlreadySaved);
        }

        for dependency in object.header().dependencies().values() {
            self.save(dependency)?;
        }
        for key in object.header().keys().values().flatten() {
            self.save(key)?;
        }

        let fingerprint = object.fingerprint();
        if let Some(existing) = self.backend.get(&fingerprint)? {
            object.header().mark_saved(existing.saved);
            return Ok(SaveOutcome::AlreadySaved);
        }

        let literal = object.literal();
        let saved = UniqueTimestamp::now();
        let atom = Atom {
            fingerprint,
            type_name: literal.type_name.clone(),
            tags: literal.tags.clone(),
            created: literal.timestamp.clone(),
            saved: saved.clone(),
            literal: literal.to_json(),
        };
        if !self.backend.put(atom)? {
            // Lost a race with a concurrent save of the same content.
            if let Some(existing) = self.backend.get(&fingerprint)? {
                object.header().mark_saved(existing.saved);
            }
            return Ok(SaveOutcome::AlreadySaved);
        }
        object.header().mark_saved(saved);
        debug!(fingerprint = %fingerprint.short_hex(), type_name = %literal.type_name, "saved object");

        self.events.publish(&StoreEvent {
            fingerprint,
            type_name: literal.type_name,
            tags: literal.tags,
            object: Arc::new(object.clone()),
        });
        Ok(SaveOutcome::Saved)
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// Load a locally stored object graph.
    pub fn load(&self, fingerprint: &Fingerprint) -> StoreResult<Arc<O>> {
        GraphLoader::new(self.backend.as_ref(), None).load(*fingerprint)
    }

    /// Load a graph whose nodes may come from `pool` when not stored
    /// locally. Pool nodes are fingerprint- and signature-checked.
    pub fn load_with_pool(&self, fingerprint: &Fingerprint, pool: &ExternalPool) -> StoreResult<Arc<O>> {
        GraphLoader::new(self.backend.as_ref(), Some(pool)).load(*fingerprint)
    }

    /// Load, treating an unresolvable reference as "not there yet".
    /// Integrity violations are still returned as errors.
    pub fn load_if_exists(&self, fingerprint: &Fingerprint) -> StoreResult<Option<Arc<O>>> {
        match self.load(fingerprint) {
            Ok(object) => Ok(Some(object)),
            Err(e) if e.is_missing() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> StoreResult<bool> {
        self.backend.contains(fingerprint)
    }

    /// The serialized literal of a stored object.
    pub fn literal_of(&self, fingerprint: &Fingerprint) -> StoreResult<Option<String>> {
        Ok(self.backend.get(fingerprint)?.map(|atom| atom.literal))
    }

    /// One page of objects of a type.
    pub fn load_by_type(&self, type_name: &str, query: &ScanQuery) -> StoreResult<Page<O>> {
        self.load_page(&IndexKey::Type(type_name.to_string()), query)
    }

    /// One page of objects carrying a tag.
    pub fn load_by_tag(&self, tag: &str, query: &ScanQuery) -> StoreResult<Page<O>> {
        self.load_page(&IndexKey::Tag(tag.to_string()), query)
    }

    /// Every object of a type, ordered by creation or arrival time.
    pub fn load_all_by_type(
        &self,
        type_name: &str,
        order: Order,
        use_recv_time: bool,
    ) -> StoreResult<Vec<Arc<O>>> {
        Ok(self
            .load_by_type(type_name, &ScanQuery::new(order, use_recv_time))?
            .objects)
    }

    /// Every object carrying a tag, ordered by creation or arrival time.
    pub fn load_all_by_tag(&self, tag: &str, order: Order, use_recv_time: bool) -> StoreResult<Vec<Arc<O>>> {
        Ok(self
            .load_by_tag(tag, &ScanQuery::new(order, use_recv_time))?
            .objects)
    }

    fn load_page(&self, index: &IndexKey, query: &ScanQuery) -> StoreResult<Page<O>> {
        let cursors = self.backend.scan(index, query)?;
        let mut loader = GraphLoader::new(self.backend.as_ref(), None);
        let objects = cursors
            .iter()
            .map(|cursor| loader.load(cursor.fingerprint))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Page {
            objects,
            last: cursors.last().cloned(),
        })
    }

    // ---------------------------------------------------------------
    // Notifications
    // ---------------------------------------------------------------

    /// Be notified of every matching object saved from now on.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription<O> {
        self.events.subscribe(filter)
    }

    /// Be notified of every object of `type_name` saved from now on.
    pub fn subscribe_type(&self, type_name: impl Into<String>) -> Subscription<O> {
        self.subscribe(EventFilter::Type(type_name.into()))
    }

    /// Be notified of every object tagged `tag` saved from now on.
    pub fn subscribe_tag(&self, tag: impl Into<String>) -> Subscription<O> {
        self.subscribe(EventFilter::Tag(tag.into()))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }
}

impl<O> std::fmt::Debug for ObjectStore<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("atoms", &self.backend.len().unwrap_or_default())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::thread;
    use std::time::Duration;

    use loam_crypto::SigningKey;

    use super::*;
    use crate::error::StoreError;
    use crate::literal::Literal;
    use crate::testing::Note;

    fn store() -> ObjectStore<Note> {
        ObjectStore::in_memory()
    }

    /// Literals of `objects` keyed by fingerprint, as a peer would ship them.
    fn pool_of(objects: &[&Note]) -> ExternalPool {
        objects
            .iter()
            .map(|o| (o.fingerprint(), o.literal().to_json()))
            .collect()
    }

    #[test]
    fn save_then_load_roundtrip() {
        let store = store();
        let dep = Arc::new(Note::new("dependency"));
        let note = Note::new("hello").with_dependency(Arc::clone(&dep)).with_tag("inbox");
        assert_eq!(store.save(&note).unwrap(), SaveOutcome::Saved);

        let loaded = store.load(&note.fingerprint()).unwrap();
        assert_eq!(loaded.text, "hello");
        assert_eq!(loaded.fingerprint(), note.fingerprint());
        assert!(loaded.header().has_tag("inbox"));
        assert!(loaded.header().is_saved());
        let loaded_dep = loaded.header().dependency(&dep.fingerprint()).unwrap();
        assert_eq!(loaded_dep.text, "dependency");
        assert!(loaded_dep.header().is_saved());
    }

    #[test]
    fn save_writes_dependencies_first() {
        let store = store();
        let dep = Arc::new(Note::new("dep"));
        let note = Note::new("root").with_dependency(Arc::clone(&dep));
        store.save(&note).unwrap();

        assert!(dep.header().is_saved());
        assert!(store.contains(&dep.fingerprint()).unwrap());
        assert!(store.contains(&note.fingerprint()).unwrap());
    }

    #[test]
    fn save_is_idempotent() {
        let store = store();
        let stamp = UniqueTimestamp::from_parts(42, 7);
        let note = Note::at("same", stamp.clone());
        assert_eq!(store.save(&note).unwrap(), SaveOutcome::Saved);
        assert_eq!(store.save(&note).unwrap(), SaveOutcome::AlreadySaved);

        // Identical content built independently is recognised by fingerprint.
        let twin = Note::at("same", stamp);
        assert!(!twin.header().is_saved());
        assert_eq!(store.save(&twin).unwrap(), SaveOutcome::AlreadySaved);
        assert_eq!(twin.header().saved_at(), note.header().saved_at());
        assert_eq!(store.backend().len().unwrap(), 1);
    }

    #[test]
    fn literal_of_returns_serialized_form() {
        let store = store();
        let note = Note::new("text");
        store.save(&note).unwrap();
        let text = store.literal_of(&note.fingerprint()).unwrap().unwrap();
        assert_eq!(Literal::parse(&text).unwrap().fingerprint(), note.fingerprint());
        assert!(store
            .literal_of(&Fingerprint::from_bytes(b"absent"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn missing_dependency_is_reported() {
        let store = store();
        let dep = Note::new("never stored");
        let note = Note::new("orphan").with_dependency(Arc::new(dep.clone()));
        let literal = note.literal();
        store
            .backend()
            .put(Atom {
                fingerprint: note.fingerprint(),
                type_name: literal.type_name.clone(),
                tags: literal.tags.clone(),
                created: literal.timestamp.clone(),
                saved: UniqueTimestamp::now(),
                literal: literal.to_json(),
            })
            .unwrap();

        let err = store.load(&note.fingerprint()).unwrap_err();
        assert!(matches!(err, StoreError::MissingDependency(fp) if fp == dep.fingerprint()));
        assert!(store.load_if_exists(&note.fingerprint()).unwrap().is_none());
        assert!(store
            .load_if_exists(&Fingerprint::from_bytes(b"nothing"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn loads_from_external_pool_and_persists() {
        let store = store();
        let dep = Arc::new(Note::new("remote dep"));
        let note = Note::new("remote").with_dependency(Arc::clone(&dep));
        let pool = pool_of(&[&note, &dep]);

        let loaded = store.load_with_pool(&note.fingerprint(), &pool).unwrap();
        assert!(!loaded.header().is_saved());
        assert_eq!(store.save(&loaded).unwrap(), SaveOutcome::Saved);
        assert!(store.contains(&dep.fingerprint()).unwrap());

        let local = store.load(&note.fingerprint()).unwrap();
        assert_eq!(local.text, "remote");
    }

    #[test]
    fn pool_resolution_prefers_local_copies() {
        let store = store();
        let dep = Arc::new(Note::new("local"));
        store.save(&dep).unwrap();
        let note = Note::new("remote").with_dependency(Arc::clone(&dep));

        // Only the root travels; its dependency is found locally.
        let loaded = store
            .load_with_pool(&note.fingerprint(), &pool_of(&[&note]))
            .unwrap();
        let resolved = loaded.header().dependency(&dep.fingerprint()).unwrap();
        assert!(resolved.header().is_saved());
    }

    #[test]
    fn tampered_literal_is_rejected() {
        let store = store();
        let note = Note::new("pay alice 10");
        let mut pool = pool_of(&[&note]);
        let forged = pool[&note.fingerprint()].replace("alice", "mallory");
        pool.insert(note.fingerprint(), forged);

        let err = store.load_with_pool(&note.fingerprint(), &pool).unwrap_err();
        assert!(matches!(err, StoreError::FingerprintMismatch { expected, .. } if expected == note.fingerprint()));
        assert!(err.is_integrity_violation());
        assert!(!store.contains(&note.fingerprint()).unwrap());
    }

    #[test]
    fn cyclic_graph_is_rejected() {
        let store = store();
        let a = Fingerprint::from_bytes(b"a");
        let b = Fingerprint::from_bytes(b"b");
        let forge = |text: &str, dependency: Fingerprint| {
            let mut literal = Note::new(text).literal();
            literal.dependencies = BTreeSet::from([dependency]);
            literal.to_json()
        };
        let pool = ExternalPool::from([(a, forge("a", b)), (b, forge("b", a))]);

        let err = store.load_with_pool(&a, &pool).unwrap_err();
        assert!(matches!(err, StoreError::CyclicDependency(fp) if fp == a));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let store = store();
        let a = Fingerprint::from_bytes(b"self");
        let mut literal = Note::new("loop").literal();
        literal.dependencies = BTreeSet::from([a]);
        let pool = ExternalPool::from([(a, literal.to_json())]);

        let err = store.load_with_pool(&a, &pool).unwrap_err();
        assert!(matches!(err, StoreError::CyclicDependency(_)));
    }

    #[test]
    fn signed_objects_verify() {
        let store = store();
        let key = SigningKey::generate();
        let signer = Arc::new(Note::signer("alice", &key));
        let mut note = Note::new("signed").with_author(Arc::clone(&signer));
        note.sign(signer.fingerprint(), &key);

        let loaded = store
            .load_with_pool(&note.fingerprint(), &pool_of(&[&note, &signer]))
            .unwrap();
        assert!(loaded.header().signature(&signer.fingerprint()).is_some());
    }

    #[test]
    fn signature_by_wrong_key_is_rejected() {
        let store = store();
        let key = SigningKey::generate();
        let signer = Arc::new(Note::signer("alice", &key));
        let mut note = Note::new("forged").with_author(Arc::clone(&signer));
        note.sign(signer.fingerprint(), &SigningKey::generate());

        let err = store
            .load_with_pool(&note.fingerprint(), &pool_of(&[&note, &signer]))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSignature { signer: s, .. } if s == signer.fingerprint()));
    }

    #[test]
    fn missing_required_signature_is_rejected() {
        let store = store();
        let key = SigningKey::generate();
        let signer = Arc::new(Note::signer("alice", &key));
        let note = Note::new("unsigned").with_author(Arc::clone(&signer));

        let err = store
            .load_with_pool(&note.fingerprint(), &pool_of(&[&note, &signer]))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSignature { .. }));
    }

    #[test]
    fn signature_claim_by_keyless_object_is_rejected() {
        let store = store();
        let plain = Arc::new(Note::new("no key"));
        let mut note = Note::new("claims").with_dependency(Arc::clone(&plain));
        note.sign(plain.fingerprint(), &SigningKey::generate());

        let err = store
            .load_with_pool(&note.fingerprint(), &pool_of(&[&note, &plain]))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSignature { .. }));
    }

    #[test]
    fn unavailable_key_is_elided() {
        let origin = store();
        let secret = Arc::new(Note::new("secret material"));
        let note = Note::new("holder").with_key(Arc::clone(&secret));
        origin.save(&note).unwrap();
        assert!(origin.contains(&secret.fingerprint()).unwrap());

        // The peer ships the holder without its key.
        let peer = store();
        let loaded = peer
            .load_with_pool(&note.fingerprint(), &pool_of(&[&note]))
            .unwrap();
        assert!(loaded.header().keys().contains_key(&secret.fingerprint()));
        assert!(loaded.header().key(&secret.fingerprint()).is_none());
        assert_eq!(loaded.fingerprint(), note.fingerprint());

        peer.save(&loaded).unwrap();
        assert!(!peer.contains(&secret.fingerprint()).unwrap());
        let reloaded = peer.load(&note.fingerprint()).unwrap();
        assert!(reloaded.header().key(&secret.fingerprint()).is_none());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let store = store();
        let mut literal = Note::new("odd").literal();
        literal.type_name = "mystery".into();
        let fp = literal.fingerprint();
        let pool = ExternalPool::from([(fp, literal.to_json())]);
        let err = store.load_with_pool(&fp, &pool).unwrap_err();
        assert!(matches!(err, StoreError::UnknownType(t) if t == "mystery"));
    }

    #[test]
    fn index_orders_by_creation_or_arrival() {
        let store = store();
        let older = Note::at("older", UniqueTimestamp::from_parts(10, 0));
        let newer = Note::at("newer", UniqueTimestamp::from_parts(20, 0));
        store.save(&newer).unwrap();
        thread::sleep(Duration::from_millis(3));
        store.save(&older).unwrap();

        let texts = |objects: Vec<Arc<Note>>| objects.iter().map(|o| o.text.clone()).collect::<Vec<_>>();
        assert_eq!(
            texts(store.load_all_by_type("note", Order::Ascending, false).unwrap()),
            ["older", "newer"]
        );
        assert_eq!(
            texts(store.load_all_by_type("note", Order::Ascending, true).unwrap()),
            ["newer", "older"]
        );
        assert_eq!(
            texts(store.load_all_by_type("note", Order::Descending, false).unwrap()),
            ["newer", "older"]
        );
    }

    #[test]
    fn tag_index_pages() {
        let store = store();
        for i in 0..5u64 {
            let note = Note::at(&format!("n{i}"), UniqueTimestamp::from_parts(i, 0)).with_tag("feed");
            store.save(&note).unwrap();
        }
        store.save(&Note::new("untagged")).unwrap();

        let first = store
            .load_by_tag("feed", &ScanQuery::default().with_limit(2))
            .unwrap();
        assert_eq!(first.objects.len(), 2);
        assert_eq!(first.objects[0].text, "n0");
        let rest = store
            .load_by_tag("feed", &ScanQuery::default().after(first.last.unwrap()))
            .unwrap();
        let texts: Vec<_> = rest.objects.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, ["n2", "n3", "n4"]);
        assert_eq!(store.load_all_by_tag("feed", Order::Ascending, false).unwrap().len(), 5);
        assert!(store.load_all_by_tag("none", Order::Ascending, false).unwrap().is_empty());
    }

    #[test]
    fn subscribers_see_matching_saves() {
        let store = store();
        let mut notes = store.subscribe_type("note");
        let mut inbox = store.subscribe_tag("inbox");

        let dep = Arc::new(Note::new("dep"));
        let note = Note::new("tagged").with_dependency(Arc::clone(&dep)).with_tag("inbox");
        store.save(&note).unwrap();

        assert_eq!(notes.try_recv().unwrap().fingerprint, dep.fingerprint());
        assert_eq!(notes.try_recv().unwrap().fingerprint, note.fingerprint());
        assert!(notes.try_recv().is_none());
        let event = inbox.try_recv().unwrap();
        assert_eq!(event.object.text, "tagged");
        assert!(inbox.try_recv().is_none());

        // Re-saving publishes nothing.
        store.save(&note).unwrap();
        assert!(notes.try_recv().is_none());
    }

    #[test]
    fn unsubscribed_receivers_stop() {
        let store = store();
        let mut sub = store.subscribe_type("note");
        assert!(store.unsubscribe(sub.id()));
        store.save(&Note::new("later")).unwrap();
        assert!(sub.try_recv().is_none());
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_asynchronously() {
        let store = Arc::new(store());
        let mut sub = store.subscribe_type("note");
        let writer = Arc::clone(&store);
        let handle = tokio::task::spawn_blocking(move || {
            let note = Note::new("async");
            writer.save(&note).unwrap();
            note.fingerprint()
        });
        let event = sub.recv().await.unwrap();
        assert_eq!(event.fingerprint, handle.await.unwrap());
    }

    #[test]
    fn concurrent_loads_of_one_graph() {
        let store = Arc::new(store());
        let dep = Arc::new(Note::new("shared"));
        let note = Note::new("root").with_dependency(Arc::clone(&dep));
        store.save(&note).unwrap();
        let fp = note.fingerprint();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.load(&fp).unwrap())
            })
            .collect();
        for handle in handles {
            let loaded = handle.join().unwrap();
            assert_eq!(loaded.fingerprint(), fp);
            assert_eq!(loaded.header().dependencies().len(), 1);
        }
    }

    #[test]
    fn concurrent_saves_write_once() {
        let store = Arc::new(store());
        let dep = Arc::new(Note::new("shared"));
        let note = Note::new("root").with_dependency(Arc::clone(&dep));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let copy = note.clone();
                thread::spawn(move || store.save(&copy).unwrap())
            })
            .collect();
        let saved = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| *outcome == SaveOutcome::Saved)
            .count();
        assert_eq!(saved, 1);
        assert_eq!(store.backend().len().unwrap(), 2);
    }
}
