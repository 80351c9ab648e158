//! Runtime configuration model.
//!
//! The configuration is resolved once at startup and passed explicitly to
//! the image store, the registry client and the container workspace layout.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{HuskError, Result};

/// Endpoints of the image registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Index URL that issues repository tokens.
    pub index_url: String,
    /// Registry URL serving tags, ancestry and layers.
    pub registry_url: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            index_url: constants::DEFAULT_INDEX_URL.into(),
            registry_url: constants::DEFAULT_REGISTRY_URL.into(),
        }
    }
}

/// Root configuration for the husk runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Base directory holding the layer cache, image trees and containers.
    pub data_dir: PathBuf,
    /// Registry endpoints.
    pub registry: RegistryConfig,
    /// Buffer size used when streaming layers to disk.
    pub chunk_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(constants::SYSTEM_DATA_DIR),
            registry: RegistryConfig::default(),
            chunk_size: constants::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl RuntimeConfig {
    /// Chooses the data directory from the effective privilege level.
    ///
    /// Root uses the system directory; everyone else gets `$HOME/.husk`,
    /// falling back to the system directory when no home is known.
    #[must_use]
    pub fn for_privilege(is_root: bool, home: Option<&Path>) -> Self {
        let data_dir = match home {
            Some(home) if !is_root => home.join(constants::USER_DATA_DIR_NAME),
            _ => PathBuf::from(constants::SYSTEM_DATA_DIR),
        };
        Self {
            data_dir,
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// holds an unusable value.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HuskError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Config` for a zero chunk size, a relative data
    /// directory, or empty registry URLs.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(HuskError::Config {
                message: "chunk_size must be greater than zero".into(),
            });
        }
        if !self.data_dir.is_absolute() {
            return Err(HuskError::Config {
                message: format!(
                    "data_dir must be an absolute path: {}",
                    self.data_dir.display()
                ),
            });
        }
        if self.registry.index_url.is_empty() || self.registry.registry_url.is_empty() {
            return Err(HuskError::Config {
                message: "registry URLs must not be empty".into(),
            });
        }
        Ok(())
    }
}
