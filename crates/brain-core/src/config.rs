//! # Engine Configuration
//!
//! Tunables for a `Brain` instance. Deserialisable so the host can load it
//! from a TOML file; every field has a default.

use crate::BrainError;
use crate::primitives::{
    DEFAULT_LOCK_WAIT_WARN_MS, DEFAULT_MAX_EVAL_DEPTH, DEFAULT_MAX_LOCK_RETRIES,
    DEFAULT_POOL_CAPACITY,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime configuration of the Brain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrainConfig {
    /// Idle id-list buffers retained by the pool.
    pub pool_capacity: usize,
    /// Log a warning when a lock wait exceeds this many milliseconds. 0 disables.
    pub lock_wait_warn_ms: u64,
    /// Attempts to build a stable lock set for compound operations.
    pub max_lock_retries: usize,
    /// Maximum nesting of expression evaluation.
    pub max_eval_depth: usize,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            lock_wait_warn_ms: DEFAULT_LOCK_WAIT_WARN_MS,
            max_lock_retries: DEFAULT_MAX_LOCK_RETRIES,
            max_eval_depth: DEFAULT_MAX_EVAL_DEPTH,
        }
    }
}

impl BrainConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), BrainError> {
        if self.max_lock_retries == 0 {
            return Err(BrainError::Config(
                "max_lock_retries must be at least 1".to_string(),
            ));
        }
        if self.max_eval_depth == 0 {
            return Err(BrainError::Config(
                "max_eval_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The lock wait warning threshold, if enabled.
    #[must_use]
    pub fn lock_wait_warn(&self) -> Option<Duration> {
        (self.lock_wait_warn_ms > 0).then(|| Duration::from_millis(self.lock_wait_warn_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = BrainConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool_capacity, DEFAULT_POOL_CAPACITY);
        assert!(config.lock_wait_warn().is_some());
    }

    #[test]
    fn zero_retries_rejected() {
        let config = BrainConfig {
            max_lock_retries: 0,
            ..BrainConfig::default()
        };
        assert!(matches!(config.validate(), Err(BrainError::Config(_))));
    }

    #[test]
    fn zero_warn_threshold_disables_warning() {
        let config = BrainConfig {
            lock_wait_warn_ms: 0,
            ..BrainConfig::default()
        };
        assert!(config.lock_wait_warn().is_none());
    }
}
