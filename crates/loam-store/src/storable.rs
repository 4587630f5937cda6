use loam_crypto::VerifyingKey;
use loam_types::Fingerprint;
use serde_json::{Map, Value};

use crate::error::StoreResult;
use crate::header::StorableHeader;
use crate::literal::Literal;

/// A persistable entity.
///
/// The store is generic over one closed set of storable types `O`, usually
/// an enum with one variant per registered type name. `from_literal`
/// dispatches on [`Literal::type_name`] and must reject names it does not
/// know with [`StoreError::UnknownType`](crate::StoreError::UnknownType).
pub trait Storable: Sized + Send + Sync + 'static {
    /// Registered type name written to the literal's `type` field.
    fn type_name(&self) -> &'static str;

    fn header(&self) -> &StorableHeader<Self>;

    fn header_mut(&mut self) -> &mut StorableHeader<Self>;

    /// Type-specific literal fields. Must not use
    /// [`RESERVED_FIELDS`](crate::literal::RESERVED_FIELDS).
    fn body(&self) -> Map<String, Value>;

    /// Rebuild an entity from its literal. References in `header` are already
    /// resolved.
    fn from_literal(literal: &Literal, header: StorableHeader<Self>) -> StoreResult<Self>;

    /// Public key of identity-like entities, used to check signatures made by
    /// this entity.
    fn verifying_key(&self) -> Option<VerifyingKey> {
        None
    }

    /// Signers whose signature must be present for the entity to be
    /// admitted from an external pool.
    fn required_signers(&self) -> Vec<Fingerprint> {
        Vec::new()
    }
}

/// Content fingerprinting for every [`Storable`].
pub trait Fingerprintable {
    /// Fingerprint of the canonical literal, cached until content changes.
    fn fingerprint(&self) -> Fingerprint;

    /// The literal this entity serializes to.
    fn literal(&self) -> Literal;
}

impl<T: Storable> Fingerprintable for T {
    fn fingerprint(&self) -> Fingerprint {
        *self
            .header()
            .fingerprint_cache()
            .get_or_init(|| self.literal().fingerprint())
    }

    fn literal(&self) -> Literal {
        let header = self.header();
        Literal {
            type_name: self.type_name().to_string(),
            body: self.body(),
            tags: header.tags().clone(),
            dependencies: header.dependencies().keys().copied().collect(),
            keys: header.keys().keys().copied().collect(),
            timestamp: header.timestamp().clone(),
            signatures: header.signatures().clone(),
        }
    }
}
