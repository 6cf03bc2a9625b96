use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::reactive::ChangeStrategy;

/// Configuration for the pool store and its reaper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of history entries kept per pool (at least 1)
    /// Default: 100
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Maximum length of a derivation chain, counted in edges from its root
    /// Default: 10
    #[serde(default = "default_max_derivation_depth")]
    pub max_derivation_depth: usize,

    /// Equality policy gating propagation
    /// Default: deep
    #[serde(default)]
    pub change_detection: ChangeStrategy,

    /// Idle time after which an unsubscribed pool may be evicted (milliseconds)
    /// Default: 300000 (5 minutes)
    #[serde(default = "default_inactivity_threshold_ms")]
    pub inactivity_threshold_ms: u64,

    /// How often the background reaper runs (milliseconds)
    /// Default: 60000
    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,

    /// Fallbacks for combinator arguments
    #[serde(default)]
    pub combinators: CombinatorDefaults,
}

fn default_history_limit() -> usize {
    100
}

fn default_max_derivation_depth() -> usize {
    10
}

fn default_inactivity_threshold_ms() -> u64 {
    300_000
}

fn default_reap_interval_ms() -> u64 {
    60_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            max_derivation_depth: default_max_derivation_depth(),
            change_detection: ChangeStrategy::default(),
            inactivity_threshold_ms: default_inactivity_threshold_ms(),
            reap_interval_ms: default_reap_interval_ms(),
            combinators: CombinatorDefaults::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON, filling omitted fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.history_limit == 0 {
            return Err(Error::Config("history_limit must be at least 1".into()));
        }
        if self.reap_interval_ms == 0 {
            return Err(Error::Config("reap_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn with_max_derivation_depth(mut self, depth: usize) -> Self {
        self.max_derivation_depth = depth;
        self
    }

    pub fn with_change_detection(mut self, strategy: ChangeStrategy) -> Self {
        self.change_detection = strategy;
        self
    }

    pub fn with_inactivity_threshold_ms(mut self, ms: u64) -> Self {
        self.inactivity_threshold_ms = ms;
        self
    }

    pub fn with_reap_interval_ms(mut self, ms: u64) -> Self {
        self.reap_interval_ms = ms.max(1);
        self
    }

    pub fn with_combinators(mut self, defaults: CombinatorDefaults) -> Self {
        self.combinators = defaults;
        self
    }
}

/// Values used when a combinator argument is missing or malformed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinatorDefaults {
    pub debounce_ms: u64,
    pub throttle_ms: u64,
    pub buffer_size: usize,
    pub buffer_timeout_ms: u64,
    pub cache_ttl_ms: u64,
    pub retry_max: u32,
    pub retry_backoff_ms: u64,
    pub sample_ms: u64,
    pub delay_ms: u64,
}

impl Default for CombinatorDefaults {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            throttle_ms: 1_000,
            buffer_size: 10,
            buffer_timeout_ms: 1_000,
            cache_ttl_ms: 60_000,
            retry_max: 3,
            retry_backoff_ms: 1_000,
            sample_ms: 1_000,
            delay_ms: 1_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config.history_limit, 100);
        assert_eq!(config.max_derivation_depth, 10);
        assert_eq!(config.change_detection, ChangeStrategy::Deep);
        assert_eq!(config.combinators, CombinatorDefaults::default());
    }

    #[test]
    fn partial_json_overrides() {
        let config = EngineConfig::from_json(
            r#"{"history_limit": 5, "change_detection": "shallow", "combinators": {"buffer_size": 3}}"#,
        )
        .unwrap();
        assert_eq!(config.history_limit, 5);
        assert_eq!(config.change_detection, ChangeStrategy::Shallow);
        assert_eq!(config.combinators.buffer_size, 3);
        assert_eq!(config.combinators.debounce_ms, 300);
    }

    #[test]
    fn zero_history_limit_is_rejected() {
        let err = EngineConfig::from_json(r#"{"history_limit": 0}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn builder_clamps_history_limit() {
        let config = EngineConfig::new().with_history_limit(0);
        assert_eq!(config.history_limit, 1);
    }
}
