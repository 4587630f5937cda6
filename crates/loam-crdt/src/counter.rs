use std::fmt;

use loam_types::UniqueTimestamp;
use serde::{Deserialize, Serialize};

use crate::error::CrdtError;

const COUNT_DIGITS: usize = 16;

/// Version stamp for last-writer-wins registers.
///
/// Layout: 16 hex digits of a per-writer count followed by a
/// [`UniqueTimestamp`]. Compared as strings, counters order first by count
/// and then by timestamp, so the order is total and two counters are equal
/// only if they are the same counter.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UniqueCounter(String);

impl UniqueCounter {
    /// A counter at count zero.
    pub fn fresh() -> Self {
        Self::with_count(0)
    }

    /// The next counter for the same writer. The count goes up by one and the
    /// timestamp is minted anew, so the result is strictly greater than
    /// `self`.
    pub fn increment(&self) -> Self {
        Self::with_count(self.count().saturating_add(1))
    }

    fn with_count(count: u64) -> Self {
        Self(format!("{count:016x}{}", UniqueTimestamp::now()))
    }

    pub fn count(&self) -> u64 {
        self.0
            .get(..COUNT_DIGITS)
            .and_then(|digits| u64::from_str_radix(digits, 16).ok())
            .unwrap_or_default()
    }

    /// Parse and validate a serialized counter.
    pub fn parse(s: &str) -> Result<Self, CrdtError> {
        let invalid = || CrdtError::InvalidCounter(s.to_string());
        let (count, stamp) = s.split_at_checked(COUNT_DIGITS).ok_or_else(invalid)?;
        if !count.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(invalid());
        }
        UniqueTimestamp::parse(stamp).map_err(|_| invalid())?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UniqueCounter {
    type Error = CrdtError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UniqueCounter> for String {
    fn from(counter: UniqueCounter) -> Self {
        counter.0
    }
}

impl fmt::Display for UniqueCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for UniqueCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UniqueCounter({})", self.0)
    }
}
