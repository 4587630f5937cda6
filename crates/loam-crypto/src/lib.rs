//! Cryptographic primitives for Loam.
//!
//! Provides canonical serialization of structured values, domain-separated
//! BLAKE3 fingerprinting, and Ed25519 signing/verification.
//!
//! All operations wrap established libraries; there is no custom cryptography.

pub mod canonical;
pub mod hasher;
pub mod signer;

pub use canonical::{canonical_string, EXCLUDED_FIELDS};
pub use hasher::ContentHasher;
pub use signer::{Signature, SignatureError, SigningKey, VerifyingKey};
