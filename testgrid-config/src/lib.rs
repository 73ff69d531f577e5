//! Domain-driven configuration management for Testgrid
//!
//! Configuration is split by functional domain, with validation, defaults,
//! and YAML file loading.

pub mod domains;
pub mod error;
pub mod loader;
pub mod validation;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

// Re-export domain configurations
pub use domains::{
    engine::EngineConfig, hosting::HostingConfig, logging::LoggingConfig, TestGridConfig,
};
