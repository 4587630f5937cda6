use loam_types::Fingerprint;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A referenced fingerprint is neither stored locally nor in the
    /// external pool. Recoverable: it may arrive later.
    #[error("missing dependency: {0}")]
    MissingDependency(Fingerprint),

    /// A fingerprint appears among its own ancestors during a load.
    #[error("cyclic dependency through {0}")]
    CyclicDependency(Fingerprint),

    /// Received content does not hash to the fingerprint it was offered under.
    #[error("fingerprint mismatch: expected {expected}, computed {computed}")]
    FingerprintMismatch {
        expected: Fingerprint,
        computed: Fingerprint,
    },

    /// A claimed signatory did not sign the object, or cannot verify.
    #[error("invalid signature on {object} by {signer}")]
    InvalidSignature {
        object: Fingerprint,
        signer: Fingerprint,
    },

    /// The literal names a type no deserializer is registered for.
    #[error("unknown object type: {0}")]
    UnknownType(String),

    /// The literal or one of its fields cannot be decoded.
    #[error("malformed literal: {0}")]
    Malformed(String),

    /// Failure inside the persistence backend.
    #[error("backend error: {0}")]
    Backend(String),

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Tamper, forgery and malformed-graph failures. These must never be
    /// swallowed by callers.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::CyclicDependency(_) | Self::FingerprintMismatch { .. } | Self::InvalidSignature { .. }
        )
    }

    /// `true` for the "not available yet" case.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::MissingDependency(_))
    }

    pub(crate) fn malformed(reason: impl std::fmt::Display) -> Self {
        Self::Malformed(reason.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
