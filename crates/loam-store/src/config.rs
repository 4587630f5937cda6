use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Configuration for an [`ObjectStore`](crate::ObjectStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Capacity of each subscriber's broadcast channel. A subscriber that
    /// falls further behind skips the oldest events.
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
        }
    }
}

impl StoreConfig {
    /// Parse from TOML; absent fields take their defaults.
    pub fn from_toml(text: &str) -> StoreResult<Self> {
        toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        assert_eq!(StoreConfig::default().event_capacity, 1024);
    }

    #[test]
    fn parses_toml() {
        let config = StoreConfig::from_toml("event_capacity = 16").unwrap();
        assert_eq!(config.event_capacity, 16);
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(StoreConfig::from_toml("").unwrap(), StoreConfig::default());
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = StoreConfig::from_toml("event_capacity = \"many\"").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
