/// Errors from decoding CRDT operations.
#[derive(Debug, thiserror::Error)]
pub enum CrdtError {
    #[error("invalid unique counter: {0}")]
    InvalidCounter(String),
}
