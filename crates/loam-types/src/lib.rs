//! Foundation types for Loam.
//!
//! Every other Loam crate depends on `loam-types`.
//!
//! # Key Types
//!
//! - [`Fingerprint`]: content-addressed identifier (BLAKE3 hash)
//! - [`UniqueTimestamp`]: wall-clock prefixed, randomly suffixed stamp with a total order

pub mod error;
pub mod fingerprint;
pub mod timestamp;

pub use error::TypeError;
pub use fingerprint::Fingerprint;
pub use timestamp::UniqueTimestamp;
