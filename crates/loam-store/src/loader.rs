//! Recursive, cycle-checked reconstruction of object graphs.
//!
//! One [`GraphLoader`] serves one `load` call. Fingerprints are resolved
//! against the local backend first and the caller's external pool second,
//! each at most once per traversal. The `ancestors` set holds the path from
//! the root to the node being built; meeting one of them again is a cycle.
//!
//! Objects coming from the external pool are not trusted: their fingerprint
//! is recomputed and every signature is checked. Objects read from the local
//! backend were checked when they were admitted and are taken as they are.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use loam_types::{Fingerprint, UniqueTimestamp};
use tracing::debug;

use crate::backend::AtomBackend;
use crate::error::{StoreError, StoreResult};
use crate::header::StorableHeader;
use crate::literal::Literal;
use crate::storable::{Fingerprintable, Storable};

/// Serialized literals received from a peer and not yet persisted, keyed by
/// the fingerprint they were offered under.
pub type ExternalPool = HashMap<Fingerprint, String>;

/// Where a literal was found.
enum Source {
    Local { saved: UniqueTimestamp },
    External,
}

pub(crate) struct GraphLoader<'a, O> {
    backend: &'a dyn AtomBackend,
    pool: Option<&'a ExternalPool>,
    memo: HashMap<Fingerprint, Arc<O>>,
    ancestors: HashSet<Fingerprint>,
}

impl<'a, O: Storable> GraphLoader<'a, O> {
    pub(crate) fn new(backend: &'a dyn AtomBackend, pool: Option<&'a ExternalPool>) -> Self {
        Self {
            backend,
            pool,
            memo: HashMap::new(),
            ancestors: HashSet::new(),
        }
    }

    /// Resolve `fingerprint` and everything it references.
    pub(crate) fn load(&mut self, fingerprint: Fingerprint) -> StoreResult<Arc<O>> {
        if self.ancestors.contains(&fingerprint) {
            return Err(StoreError::CyclicDependency(fingerprint));
        }
        if let Some(object) = self.memo.get(&fingerprint) {
            return Ok(Arc::clone(object));
        }
        let (literal, source) = self
            .fetch(&fingerprint)?
            .ok_or(StoreError::MissingDependency(fingerprint))?;

        self.ancestors.insert(fingerprint);
        let built = self.build(fingerprint, &literal, source);
        self.ancestors.remove(&fingerprint);

        let object = Arc::new(built?);
        self.memo.insert(fingerprint, Arc::clone(&object));
        Ok(object)
    }

    /// Like [`load`](Self::load), but a fingerprint found nowhere yields
    /// `None`. Used for keys, which peers may legitimately not hold.
    fn load_optional(&mut self, fingerprint: Fingerprint) -> StoreResult<Option<Arc<O>>> {
        match self.load(fingerprint) {
            Ok(object) => Ok(Some(object)),
            Err(StoreError::MissingDependency(missing)) if missing == fingerprint => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn fetch(&self, fingerprint: &Fingerprint) -> StoreResult<Option<(Literal, Source)>> {
        if let Some(atom) = self.backend.get(fingerprint)? {
            let literal = Literal::parse(&atom.literal)?;
            return Ok(Some((literal, Source::Local { saved: atom.saved })));
        }
        if let Some(text) = self.pool.and_then(|pool| pool.get(fingerprint)) {
            let literal = Literal::parse(text)?;
            return Ok(Some((literal, Source::External)));
        }
        Ok(None)
    }

    fn build(&mut self, fingerprint: Fingerprint, literal: &Literal, source: Source) -> StoreResult<O> {
        let mut dependencies = BTreeMap::new();
        for dep in &literal.dependencies {
            dependencies.insert(*dep, self.load(*dep)?);
        }
        let mut keys = BTreeMap::new();
        for key in &literal.keys {
            keys.insert(*key, self.load_optional(*key)?);
        }

        let header = StorableHeader::from_literal(literal, dependencies, keys);
        let object = O::from_literal(literal, header)?;

        match source {
            Source::Local { saved } => {
                object.header().mark_saved(saved);
            }
            Source::External => {
                let computed = object.fingerprint();
                if computed != fingerprint {
                    return Err(StoreError::FingerprintMismatch {
                        expected: fingerprint,
                        computed,
                    });
                }
                self.verify_signatures(fingerprint, &object)?;
                debug!(fingerprint = %fingerprint.short_hex(), type_name = %literal.type_name, "verified external object");
            }
        }
        Ok(object)
    }

    fn verify_signatures(&mut self, fingerprint: Fingerprint, object: &O) -> StoreResult<()> {
        let signatures = object.header().signatures();
        let signers: BTreeSet<Fingerprint> = signatures
            .keys()
            .copied()
            .chain(object.required_signers())
            .collect();

        for signer in signers {
            let invalid = || StoreError::InvalidSignature {
                object: fingerprint,
                signer,
            };
            let signature = signatures.get(&signer).ok_or_else(invalid)?;
            let key = if signer == fingerprint {
                object.verifying_key()
            } else {
                self.load(signer)?.verifying_key()
            };
            let key = key.ok_or_else(invalid)?;
            key.verify_fingerprint(&fingerprint, signature)
                .map_err(|_| invalid())?;
        }
        Ok(())
    }
}
