//! Configuration loading

use std::path::Path;

use crate::domains::TestGridConfig;
use crate::error::ConfigResult;

/// Configuration loader
pub struct ConfigLoader {
    /// Environment variable prefix reserved for overrides
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with the default prefix
    pub fn new() -> Self {
        Self {
            prefix: "TESTGRID".to_string(),
        }
    }

    /// Create a new config loader with a custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Load configuration from a YAML file
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<TestGridConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: TestGridConfig = serde_yaml::from_str(&content)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with a fallback to validated defaults
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<TestGridConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => {
                let config = TestGridConfig::default();
                config.validate_all()?;
                Ok(config)
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_defaults() {
        let loader = ConfigLoader::new();
        let config = loader.load(None::<&str>).unwrap();
        assert_eq!(config.engine.batch_size, 10);
        assert_eq!(loader.prefix(), "TESTGRID");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "engine:\n  batch_size: 50\n  max_parallel_hosts: 3\nhosting:\n  shared: true"
        )
        .unwrap();

        let loader = ConfigLoader::new();
        let config = loader.from_file(file.path()).unwrap();
        assert_eq!(config.engine.batch_size, 50);
        assert_eq!(config.engine.max_parallel_hosts, Some(3));
        assert!(config.hosting.shared);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "engine:\n  batch_size: 0").unwrap();

        let loader = ConfigLoader::new();
        assert!(loader.from_file(file.path()).is_err());
    }
}
