//! Configuration management for fieldlimit.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{FieldLimitError, Result};
use crate::ratelimit::RateLimitConfig;

/// Prefix for environment variable overrides, e.g.
/// `FIELDLIMIT_LOGGING__LEVEL=debug`.
pub const ENV_PREFIX: &str = "FIELDLIMIT";

/// Main configuration for fieldlimit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldLimitConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl FieldLimitConfig {
    /// Load configuration from a YAML file, with `FIELDLIMIT_*` environment
    /// variables layered on top.
    ///
    /// Only deserialization happens here; the rules themselves are validated
    /// when a limiter is built from them.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = path
            .to_str()
            .ok_or_else(|| FieldLimitError::Config(format!("non UTF-8 path: {}", path.display())))?;

        config::Config::builder()
            .add_source(config::File::new(source, config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| FieldLimitError::Config(e.to_string()))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| FieldLimitError::Config(e.to_string()))
    }
}
