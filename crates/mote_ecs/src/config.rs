//! # World Configuration
//!
//! Loaded once at startup, usually from a TOML file:
//!
//! ```toml
//! initial_capacity = 64
//! entity_capacity = 100000
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{EcsError, EcsResult};

/// Rows an archetype holds before its first growth.
pub const DEFAULT_INITIAL_CAPACITY: usize = 5;

/// Tunables applied when a [`World`](crate::World) is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorldConfig {
    /// Rows reserved per archetype; capacity doubles from here.
    pub initial_capacity: usize,
    /// Entity slots reserved in the link table up front.
    pub entity_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            entity_capacity: 0,
        }
    }
}

impl WorldConfig {
    /// Parses and validates a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] if the text is not valid TOML, has
    /// unknown keys, or fails [`WorldConfig::validate`].
    pub fn from_toml_str(text: &str) -> EcsResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| EcsError::InvalidConfig(format!("failed to parse world config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] if `initial_capacity` is zero.
    pub fn validate(&self) -> EcsResult<()> {
        if self.initial_capacity == 0 {
            return Err(EcsError::InvalidConfig(
                "initial_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = WorldConfig::default();
        assert_eq!(config.initial_capacity, DEFAULT_INITIAL_CAPACITY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = WorldConfig::from_toml_str("initial_capacity = 64").unwrap();
        assert_eq!(config.initial_capacity, 64);
        assert_eq!(config.entity_capacity, 0);
    }

    #[test]
    fn test_from_toml_rejects_zero_capacity() {
        let err = WorldConfig::from_toml_str("initial_capacity = 0").unwrap_err();
        assert!(matches!(err, EcsError::InvalidConfig(_)));
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        let err = WorldConfig::from_toml_str("capacity = 3").unwrap_err();
        assert!(matches!(err, EcsError::InvalidConfig(_)));
    }
}
