//! Configuration module for Matrixon state resolution
//!
//! These settings tune the resolution engine (cache size, fetch batching,
//! traversal bounds). They can be loaded from a JSON file here, or layered
//! from TOML and environment variables by the binary.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{MatrixonError, Result};

/// State resolution engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateResConfig {
    /// Maximum number of memoized resolutions
    pub cache_capacity: usize,

    /// Number of event ids requested from the store per lookup
    pub fetch_batch_size: usize,

    /// Deepest `auth_events` chain accepted before the graph is treated as corrupt
    pub max_auth_depth: usize,

    /// Room version assumed when no create event is available
    pub default_room_version: String,
}

impl Default for StateResConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            fetch_batch_size: 100,
            max_auth_depth: 10_000,
            default_room_version: "10".to_string(),
        }
    }
}

impl StateResConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MatrixonError::Config(format!("Failed to read config file: {}", e)))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| MatrixonError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| MatrixonError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), contents)
            .map_err(|e| MatrixonError::Config(format!("Failed to write config file: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(MatrixonError::InvalidConfig(
                "cache_capacity must be greater than 0".into(),
            ));
        }
        if self.fetch_batch_size == 0 {
            return Err(MatrixonError::InvalidConfig(
                "fetch_batch_size must be greater than 0".into(),
            ));
        }
        if self.max_auth_depth == 0 {
            return Err(MatrixonError::InvalidConfig(
                "max_auth_depth must be greater than 0".into(),
            ));
        }
        if self.default_room_version.is_empty() {
            return Err(MatrixonError::InvalidConfig(
                "default_room_version cannot be empty".into(),
            ));
        }
        Ok(())
    }
}
