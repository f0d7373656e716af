//! Configuration module for Ferrite Functions
//!
//! This module handles loading and parsing configuration from TOML files,
//! with sensible defaults for all optional values.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FerriteError, Result};

/// Configuration shared between the executor and its handlers
pub type SharedConfig = Arc<Config>;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Authentication settings
    pub security: SecurityConfig,

    /// Function registry behavior
    pub functions: FunctionsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FerriteError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| FerriteError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.databases == 0 || self.storage.databases > 16 {
            return Err(FerriteError::Config(
                "Number of databases must be between 1 and 16".to_string(),
            ));
        }

        if let Some(pass) = &self.security.requirepass {
            if pass.is_empty() {
                return Err(FerriteError::Config(
                    "requirepass cannot be an empty string".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Number of databases
    pub databases: u8,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { databases: 16 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    #[default]
    Pretty,

    /// JSON format
    Json,
}

/// Authentication settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Password required before any command is accepted
    pub requirepass: Option<String>,
}

/// Function registry behavior
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionsConfig {
    /// Let a load take over function names owned by another library
    /// instead of failing with "Function already exists"
    pub allow_function_override: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.databases, 16);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.security.requirepass.is_none());
        assert!(!config.functions.allow_function_override);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_str() {
        let toml = r#"
[storage]
databases = 4

[logging]
level = "debug"
format = "json"

[security]
requirepass = "s3cret"

[functions]
allow_function_override = true
"#;

        let config = Config::parse_str(toml).unwrap();
        assert_eq!(config.storage.databases, 4);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.security.requirepass.as_deref(), Some("s3cret"));
        assert!(config.functions.allow_function_override);
    }

    #[test]
    fn test_partial_config() {
        let config = Config::parse_str("[functions]\nallow_function_override = true\n").unwrap();
        assert_eq!(config.storage.databases, 16);
        assert!(config.functions.allow_function_override);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.storage.databases = 0;
        assert!(config.validate().is_err());

        config.storage.databases = 17;
        assert!(config.validate().is_err());

        config.storage.databases = 16;
        config.security.requirepass = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::parse_str("[storage\ndatabases = 4").unwrap_err();
        assert!(matches!(err, FerriteError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferrite.toml");
        std::fs::write(&path, "[storage]\ndatabases = 2\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.storage.databases, 2);

        let missing = dir.path().join("missing.toml");
        assert!(Config::from_file(&missing).is_err());
    }
}
