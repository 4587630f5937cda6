use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

const PREFIX: char = 'T';
const MILLIS_DIGITS: usize = 12;
const SUFFIX_DIGITS: usize = 16;
const LEN: usize = 1 + MILLIS_DIGITS + SUFFIX_DIGITS;

/// Locally-unique, lexicographically ordered timestamp.
///
/// Layout: `T` + 12 hex digits of wall-clock milliseconds + 16 hex digits of
/// randomness. Comparing two stamps as strings orders them by creation
/// millisecond first; stamps minted in the same millisecond (on any peer)
/// are ordered by their random suffix, so the order is total and two
/// concurrently created stamps never collide in practice.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniqueTimestamp(String);

impl UniqueTimestamp {
    /// Mint a stamp for the current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self::from_parts(millis, rand::random())
    }

    /// Build a stamp from explicit parts.
    pub fn from_parts(millis: u64, suffix: u64) -> Self {
        // 12 hex digits cover ~8900 years of milliseconds.
        let millis = millis & 0xffff_ffff_ffff;
        Self(format!("{PREFIX}{millis:012x}{suffix:016x}"))
    }

    /// Parse and validate a stamp produced by [`UniqueTimestamp::now`].
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let valid = s.len() == LEN
            && s.starts_with(PREFIX)
            && s[1..].bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(TypeError::InvalidTimestamp(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Wall-clock milliseconds encoded in the prefix.
    pub fn millis(&self) -> u64 {
        u64::from_str_radix(&self.0[1..1 + MILLIS_DIGITS], 16).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UniqueTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UniqueTimestamp({})", self.0)
    }
}

impl fmt::Display for UniqueTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for UniqueTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for UniqueTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_well_formed() {
        let ts = UniqueTimestamp::now();
        assert_eq!(ts.as_str().len(), LEN);
        assert!(UniqueTimestamp::parse(ts.as_str()).is_ok());
        // Should be after 2020-01-01 (1577836800000 ms)
        assert!(ts.millis() > 1_577_836_800_000);
    }

    #[test]
    fn ordering_is_millis_first() {
        let early = UniqueTimestamp::from_parts(100, u64::MAX);
        let late = UniqueTimestamp::from_parts(101, 0);
        assert!(early < late);
    }

    #[test]
    fn same_millis_ordered_by_suffix() {
        let a = UniqueTimestamp::from_parts(100, 1);
        let b = UniqueTimestamp::from_parts(100, 2);
        assert!(a < b);
        assert_eq!(a.millis(), b.millis());
    }

    #[test]
    fn concurrent_stamps_do_not_collide() {
        let stamps: std::collections::HashSet<_> =
            (0..1000).map(|_| UniqueTimestamp::now()).collect();
        assert_eq!(stamps.len(), 1000);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(UniqueTimestamp::parse("yesterday").is_err());
        assert!(UniqueTimestamp::parse("T0000000000zz0000000000000000").is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let ts = UniqueTimestamp::from_parts(1234, 5678);
        let json = serde_json::to_string(&ts).unwrap();
        let parsed: UniqueTimestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, parsed);
    }
}
