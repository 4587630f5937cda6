use loam_store::StoreError;
use loam_types::Fingerprint;

/// Errors from replicated-object operations.
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The author holds no capability for the requested action, or an
    /// operation's authorization chain does not verify.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("wrong replica kind: expected {expected}, found {found}")]
    WrongKind { expected: String, found: String },

    #[error("not a replica descriptor: {0}")]
    NotAReplica(Fingerprint),

    #[error("malformed operation: {0}")]
    Malformed(String),

    /// The identity's key pair is not held locally.
    #[error("no signing key held for identity {0}")]
    MissingKey(Fingerprint),

    #[error("unknown peer: {0}")]
    UnknownPeer(Fingerprint),

    #[error("send to {0} timed out")]
    Timeout(Fingerprint),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ReplicaError {
    pub(crate) fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized(reason.into())
    }
}

/// Result alias for replica operations.
pub type ReplicaResult<T> = Result<T, ReplicaError>;
