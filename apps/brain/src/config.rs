//! # Configuration Loading
//!
//! The engine configuration comes from an optional TOML file, then from
//! command-line overrides. Missing keys keep their defaults.
//!
//! ```toml
//! [engine]
//! pool_capacity = 32
//! lock_wait_warn_ms = 250
//! max_eval_depth = 128
//! ```

use brain_core::{BrainConfig, BrainError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config files larger than this are rejected unread (1 MiB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Layout of the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub engine: BrainConfig,
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, BrainError> {
        toml::from_str(text).map_err(|e| BrainError::Config(format!("invalid settings: {}", e)))
    }

    /// Read settings from a file.
    pub fn from_file(path: &Path) -> Result<Self, BrainError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            BrainError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(BrainError::Config(format!(
                "'{}' is not a regular file",
                path.display()
            )));
        }
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(BrainError::Config(format!(
                "config file size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            BrainError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub pool_capacity: Option<usize>,
    pub lock_wait_warn_ms: Option<u64>,
    pub max_eval_depth: Option<usize>,
}

impl Overrides {
    pub fn apply(self, config: &mut BrainConfig) {
        if let Some(v) = self.pool_capacity {
            config.pool_capacity = v;
        }
        if let Some(v) = self.lock_wait_warn_ms {
            config.lock_wait_warn_ms = v;
        }
        if let Some(v) = self.max_eval_depth {
            config.max_eval_depth = v;
        }
    }
}

/// Effective engine configuration: defaults, then the file, then overrides.
pub fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<BrainConfig, BrainError> {
    let mut config = match path {
        Some(path) => Settings::from_file(path)?.engine,
        None => BrainConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}
