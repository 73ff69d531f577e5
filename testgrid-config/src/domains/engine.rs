//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};

/// Orchestration engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long to wait for a freshly launched host to connect
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_connection_timeout")]
    pub connection_timeout: Duration,

    /// Number of found test cases batched into one notification
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How many fresh results accumulate before a stats-change notification
    #[serde(default = "default_progress_frequency")]
    pub progress_frequency: usize,

    /// Upper bound on concurrent test hosts; processor count when unset
    #[serde(default)]
    pub max_parallel_hosts: Option<usize>,

    /// Whether data collectors participate in execution runs
    #[serde(default = "crate::domains::utils::default_false")]
    pub data_collection: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connection_timeout: default_connection_timeout(),
            batch_size: default_batch_size(),
            progress_frequency: default_progress_frequency(),
            max_parallel_hosts: None,
            data_collection: false,
        }
    }
}

impl Validatable for EngineConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.connection_timeout.as_secs(),
            "connection_timeout",
            self.domain_name(),
        )?;
        validate_positive(self.batch_size, "batch_size", self.domain_name())?;
        validate_positive(
            self.progress_frequency,
            "progress_frequency",
            self.domain_name(),
        )?;

        if let Some(max_hosts) = self.max_parallel_hosts {
            validate_positive(max_hosts, "max_parallel_hosts", self.domain_name())?;
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "engine"
    }
}

/// Effective parallelism for the engine, falling back to processor count
pub fn effective_parallelism(max_parallel_hosts: Option<usize>) -> usize {
    match max_parallel_hosts {
        Some(n) if n > 0 => n,
        _ => num_cpus::get(),
    }
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_batch_size() -> usize {
    10
}

fn default_progress_frequency() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connection_timeout, Duration::from_secs(90));
        assert!(config.max_parallel_hosts.is_none());
    }

    #[test]
    fn test_zero_max_hosts_rejected() {
        let config = EngineConfig {
            max_parallel_hosts: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_parallelism() {
        assert_eq!(effective_parallelism(Some(4)), 4);
        assert_eq!(effective_parallelism(None), num_cpus::get());
        assert_eq!(effective_parallelism(Some(0)), num_cpus::get());
    }
}
