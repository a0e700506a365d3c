//! Runtime configuration (spindle.toml)
//!
//! The core has a single tunable, `fiber.stack_size`: the stack size in bytes
//! used when a fiber is created with a stack size of zero. The configuration
//! is fixed for the life of the process the first time it is read.

use crate::error::ConfigError;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default fiber stack size (128 KiB)
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

/// Smallest stack a fiber may run on
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Environment variable overriding `fiber.stack_size`
pub const STACK_SIZE_ENV: &str = "SPINDLE_FIBER_STACK_SIZE";

static CONFIG: OnceCell<Config> = OnceCell::new();

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Fiber settings
    #[serde(default)]
    pub fiber: FiberConfig,
}

/// `[fiber]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FiberConfig {
    /// Stack size in bytes for fibers created without an explicit size
    #[serde(default = "default_stack_size_value")]
    pub stack_size: usize,
}

fn default_stack_size_value() -> usize {
    DEFAULT_STACK_SIZE
}

impl Default for FiberConfig {
    fn default() -> Self {
        Self {
            stack_size: default_stack_size_value(),
        }
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Defaults, overridden by `SPINDLE_FIBER_STACK_SIZE` when set
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Ok(raw) = std::env::var(STACK_SIZE_ENV) {
            config.fiber.stack_size = raw.trim().parse().map_err(|e| ConfigError::Invalid {
                key: "fiber.stack_size",
                reason: format!("{}={:?}: {}", STACK_SIZE_ENV, raw, e),
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fiber.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::Invalid {
                key: "fiber.stack_size",
                reason: format!(
                    "{} bytes is below the minimum of {}",
                    self.fiber.stack_size, MIN_STACK_SIZE
                ),
            });
        }
        Ok(())
    }
}

/// Install the process-wide configuration.
///
/// Fails if a configuration was already installed or already read.
pub fn install(config: Config) -> Result<(), ConfigError> {
    config.validate()?;
    CONFIG.set(config).map_err(|_| ConfigError::AlreadyInstalled)
}

/// The process-wide configuration
///
/// Falls back to [`Config::from_env`] on first use; an unusable environment
/// override is logged and replaced by the defaults.
pub fn get() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::from_env().unwrap_or_else(|e| {
            tracing::warn!("ignoring fiber configuration from environment: {}", e);
            Config::default()
        })
    })
}

/// Stack size used for fibers created with a stack size of zero
pub fn default_stack_size() -> usize {
    get().fiber.stack_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.fiber.stack_size, 131072);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_stack_size() {
        let config = Config::from_toml_str("[fiber]\nstack_size = 262144\n").unwrap();
        assert_eq!(config.fiber.stack_size, 262144);
    }

    #[test]
    fn test_missing_table_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());

        let config = Config::from_toml_str("[fiber]\n").unwrap();
        assert_eq!(config.fiber.stack_size, DEFAULT_STACK_SIZE);
    }

    #[test]
    fn test_rejects_tiny_stack() {
        let err = Config::from_toml_str("[fiber]\nstack_size = 1024\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "fiber.stack_size",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = Config::from_toml_str("[fiber\nstack_size = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[fiber]").unwrap();
        writeln!(file, "stack_size = 65536").unwrap();

        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.fiber.stack_size, 65536);
    }

    #[test]
    fn test_from_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_path(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_serialize_round_trip_shape() {
        let text = toml::to_string(&Config::default()).unwrap();
        assert!(text.contains("[fiber]"));
        assert!(text.contains("stack_size = 131072"));
    }
}
