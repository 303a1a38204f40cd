//! Repository configuration
//!
//! Loading from files or the command line is left to the embedding
//! application; this type only carries the knobs the repository reads.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default name of the measure configuration object.
pub const DEFAULT_MEASURE_CONFIG_NAME: &str = "measure_config";

/// Runtime configuration for a [`Repository`](crate::Repository).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Upper bound for a single remote fetch/publish attempt
    pub remote_timeout_ms: u64,
    /// Additional attempts after a failed or timed out remote call
    pub remote_retries: u32,
    /// Compute pending evaluations in parallel (requires the `rayon` feature)
    pub parallel_stages: bool,
    /// Object holding the measure configuration
    pub measure_config_name: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            remote_timeout_ms: 30_000,
            remote_retries: 2,
            parallel_stages: cfg!(feature = "rayon"),
            measure_config_name: DEFAULT_MEASURE_CONFIG_NAME.to_string(),
        }
    }
}

impl RepoConfig {
    /// Create a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> RepoConfigBuilder {
        RepoConfigBuilder::default()
    }

    /// Remote timeout as a [`Duration`].
    #[must_use]
    pub const fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

/// Builder for [`RepoConfig`].
#[derive(Debug, Default)]
pub struct RepoConfigBuilder {
    config: RepoConfig,
}

impl RepoConfigBuilder {
    /// Set the per-attempt remote timeout in milliseconds.
    #[must_use]
    pub const fn remote_timeout_ms(mut self, ms: u64) -> Self {
        self.config.remote_timeout_ms = ms;
        self
    }

    /// Set how many times a failed remote call is retried.
    #[must_use]
    pub const fn remote_retries(mut self, retries: u32) -> Self {
        self.config.remote_retries = retries;
        self
    }

    /// Enable or disable parallel stage computation.
    #[must_use]
    pub const fn parallel_stages(mut self, enabled: bool) -> Self {
        self.config.parallel_stages = enabled;
        self
    }

    /// Override the measure configuration object name.
    #[must_use]
    pub fn measure_config_name(mut self, name: impl Into<String>) -> Self {
        self.config.measure_config_name = name.into();
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> RepoConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RepoConfig::default();
        assert_eq!(config.remote_timeout_ms, 30_000);
        assert_eq!(config.remote_retries, 2);
        assert_eq!(config.measure_config_name, "measure_config");
        assert_eq!(config.remote_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_config_builder() {
        let config = RepoConfig::builder()
            .remote_timeout_ms(500)
            .remote_retries(0)
            .parallel_stages(false)
            .measure_config_name("measures")
            .build();
        assert_eq!(config.remote_timeout_ms, 500);
        assert_eq!(config.remote_retries, 0);
        assert!(!config.parallel_stages);
        assert_eq!(config.measure_config_name, "measures");
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let config: RepoConfig = serde_json::from_str(r#"{"remote_retries": 5}"#).unwrap();
        assert_eq!(config.remote_retries, 5);
        assert_eq!(config.remote_timeout_ms, 30_000);
    }
}
