//! Domain-specific configuration modules

pub mod engine;
pub mod hosting;
pub mod logging;
pub mod utils;

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::validation::Validatable;

/// Root Testgrid configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestGridConfig {
    pub engine: engine::EngineConfig,
    pub hosting: hosting::HostingConfig,
    pub logging: logging::LoggingConfig,
}

impl TestGridConfig {
    /// Validate every domain
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.engine.validate()?;
        self.hosting.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}
