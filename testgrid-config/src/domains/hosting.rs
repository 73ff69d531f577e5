//! Test host configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_required_string, Validatable};

/// Test host process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostingConfig {
    /// Host program to spawn
    #[serde(default = "default_host_program")]
    pub host_program: String,

    /// Arguments passed ahead of the source list
    #[serde(default)]
    pub host_args: Vec<String>,

    /// Whether one host may serve multiple sequential batches
    #[serde(default = "crate::domains::utils::default_false")]
    pub shared: bool,

    /// Adapter extensions every host loads
    #[serde(default)]
    pub default_extensions: Vec<String>,

    /// Grace period before a lingering host is killed
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_terminate_timeout")]
    pub terminate_timeout: Duration,
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            host_program: default_host_program(),
            host_args: Vec::new(),
            shared: false,
            default_extensions: Vec::new(),
            terminate_timeout: default_terminate_timeout(),
        }
    }
}

impl Validatable for HostingConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.host_program, "host_program", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "hosting"
    }
}

fn default_host_program() -> String {
    "testgrid-host".to_string()
}

fn default_terminate_timeout() -> Duration {
    Duration::from_secs(1)
}
