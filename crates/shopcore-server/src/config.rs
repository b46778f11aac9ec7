//! Configuration for the coalescing primitives.
//!
//! Configuration is loaded from multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! Environment variables take precedence over file values, which take
//! precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use shopcore_server::config::CoreConfig;
//!
//! let config = CoreConfig::load("shopcore.yaml")?;
//! let window = BatchWindow::new(config.batch.window_config());
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use shopcore_domain::resource::{ResourceConfig, DEFAULT_FAILURE_STREAK_TTL};
use tracing::Level;

use crate::batch::{
    BatchWindowConfig, PartitionConfig, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_BATCH_TIME,
    DEFAULT_WAIT,
};
use crate::observability::LoggingConfig;

const ENV_PREFIX: &str = "SHOPCORE";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CoreConfig {
    #[serde(default)]
    pub batch: BatchSettings,

    #[serde(default)]
    pub partition: PartitionSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub resource: ResourceSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Debounced batch window settings.
///
/// ```yaml
/// batch:
///   wait_ms: 50
///   max_size: 200
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BatchSettings {
    /// Quiet period in milliseconds.
    /// Environment variable: `SHOPCORE_BATCH__WAIT_MS`
    #[serde(default = "default_batch_wait_ms")]
    pub wait_ms: u64,

    /// Eager-flush threshold. Unbounded when absent.
    /// Environment variable: `SHOPCORE_BATCH__MAX_SIZE`
    #[serde(default)]
    pub max_size: Option<usize>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            wait_ms: default_batch_wait_ms(),
            max_size: None,
        }
    }
}

impl BatchSettings {
    pub fn window_config(&self) -> BatchWindowConfig {
        BatchWindowConfig {
            wait: Duration::from_millis(self.wait_ms),
            max_size: self.max_size,
        }
    }
}

fn default_batch_wait_ms() -> u64 {
    DEFAULT_WAIT.as_millis() as u64
}

/// Partitioned micro-batching settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PartitionSettings {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Fixed window in milliseconds.
    #[serde(default = "default_max_batch_time_ms")]
    pub max_batch_time_ms: u64,
}

impl Default for PartitionSettings {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_batch_time_ms: default_max_batch_time_ms(),
        }
    }
}

impl PartitionSettings {
    pub fn partition_config(&self) -> PartitionConfig {
        PartitionConfig {
            max_batch_size: self.max_batch_size,
            max_batch_time: Duration::from_millis(self.max_batch_time_ms),
        }
    }
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_max_batch_time_ms() -> u64 {
    DEFAULT_MAX_BATCH_TIME.as_millis() as u64
}

/// TTL cache settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheSettings {
    /// Entry lifetime in milliseconds.
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_ms: default_cache_ttl_ms(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

fn default_cache_ttl_ms() -> u64 {
    60_000
}

/// Single-flight resource settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResourceSettings {
    /// Serve stale values while revalidating.
    /// Environment variable: `SHOPCORE_RESOURCE__REVALIDATE_IN_BACKGROUND`
    #[serde(default)]
    pub revalidate_in_background: bool,

    /// Consecutive fetch failures after which a key's cached value is
    /// cleared. Failures are only logged when absent.
    #[serde(default)]
    pub evict_after_failures: Option<u32>,

    /// Milliseconds after its last failure that a failure streak is
    /// forgotten.
    #[serde(default = "default_failure_streak_ttl_ms")]
    pub failure_streak_ttl_ms: u64,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            revalidate_in_background: false,
            evict_after_failures: None,
            failure_streak_ttl_ms: default_failure_streak_ttl_ms(),
        }
    }
}

impl ResourceSettings {
    pub fn resource_config(&self) -> ResourceConfig {
        ResourceConfig {
            revalidate_in_background: self.revalidate_in_background,
            evict_after_failures: self.evict_after_failures,
            failure_streak_ttl: Duration::from_millis(self.failure_streak_ttl_ms),
        }
    }
}

fn default_failure_streak_ttl_ms() -> u64 {
    DEFAULT_FAILURE_STREAK_TTL.as_millis() as u64
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl From<&LoggingSettings> for LoggingConfig {
    fn from(settings: &LoggingSettings) -> Self {
        let config = if settings.json {
            LoggingConfig::json()
        } else {
            LoggingConfig::text()
        };
        // `validate` restricts the level to names tracing understands.
        let level = settings.level.parse().unwrap_or(Level::INFO);
        config.with_level(level)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigLoadError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

impl CoreConfig {
    /// Loads configuration from a YAML file with environment overrides.
    ///
    /// Environment variables are prefixed with `SHOPCORE_` and use `__` as
    /// separator, e.g. `SHOPCORE_BATCH__WAIT_MS=20` overrides `batch.wait_ms`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&CoreConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(environment())
            .build()?;

        let core_config: CoreConfig = config.try_deserialize()?;
        core_config.validate()?;

        Ok(core_config)
    }

    /// Loads defaults with environment overrides only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&CoreConfig::default())?)
            .add_source(environment())
            .build()?;

        let core_config: CoreConfig = config.try_deserialize()?;
        core_config.validate()?;

        Ok(core_config)
    }

    /// Rejects settings the primitives cannot run with.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.batch.wait_ms == 0 {
            return Err(ConfigLoadError::invalid(
                "batch.wait_ms must be greater than 0",
            ));
        }
        if self.batch.max_size == Some(0) {
            return Err(ConfigLoadError::invalid(
                "batch.max_size must be greater than 0 when set",
            ));
        }
        if self.partition.max_batch_size == 0 {
            return Err(ConfigLoadError::invalid(
                "partition.max_batch_size must be greater than 0",
            ));
        }
        if self.partition.max_batch_time_ms == 0 {
            return Err(ConfigLoadError::invalid(
                "partition.max_batch_time_ms must be greater than 0",
            ));
        }
        if self.cache.ttl_ms == 0 {
            return Err(ConfigLoadError::invalid(
                "cache.ttl_ms must be greater than 0",
            ));
        }
        if self.resource.evict_after_failures == Some(0) {
            return Err(ConfigLoadError::invalid(
                "resource.evict_after_failures must be greater than 0 when set",
            ));
        }
        if self.resource.failure_streak_ttl_ms == 0 {
            return Err(ConfigLoadError::invalid(
                "resource.failure_streak_ttl_ms must be greater than 0",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::invalid(format!(
                "logging.level must be one of: {:?}, got: {}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }
}

/// `SHOPCORE_BATCH__WAIT_MS` -> `batch.wait_ms`
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_can_load_config_from_yaml_file() {
        // Arrange
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
batch:
  wait_ms: 20
  max_size: 250

partition:
  max_batch_size: 64
  max_batch_time_ms: 3

cache:
  ttl_ms: 30000

resource:
  revalidate_in_background: true
  evict_after_failures: 3

logging:
  level: debug
  json: true
"#
        )
        .unwrap();

        // Act
        let config = CoreConfig::load(file.path()).unwrap();

        // Assert
        assert_eq!(config.batch.wait_ms, 20);
        assert_eq!(config.batch.max_size, Some(250));
        assert_eq!(config.partition.max_batch_size, 64);
        assert_eq!(config.partition.max_batch_time_ms, 3);
        assert_eq!(config.cache.ttl_ms, 30_000);
        assert!(config.resource.revalidate_in_background);
        assert_eq!(config.resource.evict_after_failures, Some(3));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    #[serial]
    fn test_missing_sections_use_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "batch:\n  wait_ms: 10\n").unwrap();

        let config = CoreConfig::load(file.path()).unwrap();

        assert_eq!(config.batch.wait_ms, 10);
        assert_eq!(config.partition, PartitionSettings::default());
        assert_eq!(config.cache, CacheSettings::default());
        assert_eq!(config.resource, ResourceSettings::default());
    }

    #[test]
    #[serial]
    fn test_can_override_config_with_env_vars() {
        // Arrange
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
batch:
  wait_ms: 20

partition:
  max_batch_size: 64
"#
        )
        .unwrap();
        std::env::set_var("SHOPCORE_BATCH__WAIT_MS", "75");
        std::env::set_var("SHOPCORE_LOGGING__LEVEL", "warn");

        // Act
        let config = CoreConfig::load(file.path());
        std::env::remove_var("SHOPCORE_BATCH__WAIT_MS");
        std::env::remove_var("SHOPCORE_LOGGING__LEVEL");
        let config = config.unwrap();

        // Assert
        assert_eq!(config.batch.wait_ms, 75); // env
        assert_eq!(config.partition.max_batch_size, 64); // file
        assert_eq!(config.logging.level, "warn"); // env
    }

    #[test]
    #[serial]
    fn test_from_env_loads_defaults_with_env_overrides() {
        std::env::set_var("SHOPCORE_RESOURCE__REVALIDATE_IN_BACKGROUND", "true");

        let config = CoreConfig::from_env();
        std::env::remove_var("SHOPCORE_RESOURCE__REVALIDATE_IN_BACKGROUND");
        let config = config.unwrap();

        assert!(config.resource.revalidate_in_background);
        assert_eq!(config.batch.wait_ms, 50);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.batch.wait_ms, 50);
        assert_eq!(config.batch.max_size, None);
        assert_eq!(config.partition.max_batch_size, 100);
        assert_eq!(config.partition.max_batch_time_ms, 5);
        assert!(!config.resource.revalidate_in_background);
        assert_eq!(config.resource.evict_after_failures, None);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_config_validation_catches_errors() {
        let cases: [(fn(&mut CoreConfig), &str); 8] = [
            (|c| c.batch.wait_ms = 0, "batch.wait_ms"),
            (|c| c.batch.max_size = Some(0), "batch.max_size"),
            (|c| c.partition.max_batch_size = 0, "partition.max_batch_size"),
            (
                |c| c.partition.max_batch_time_ms = 0,
                "partition.max_batch_time_ms",
            ),
            (|c| c.cache.ttl_ms = 0, "cache.ttl_ms"),
            (
                |c| c.resource.evict_after_failures = Some(0),
                "resource.evict_after_failures",
            ),
            (
                |c| c.resource.failure_streak_ttl_ms = 0,
                "resource.failure_streak_ttl_ms",
            ),
            (|c| c.logging.level = "verbose".to_string(), "logging.level"),
        ];

        for (mutate, field) in cases {
            let mut config = CoreConfig::default();
            mutate(&mut config);
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, ConfigLoadError::Invalid { .. }),
                "expected Invalid for {field}"
            );
            assert!(
                err.to_string().contains(field),
                "error for {field} should name the field, got: {err}"
            );
        }
    }

    #[test]
    fn test_log_level_is_case_insensitive() {
        let mut config = CoreConfig::default();
        config.logging.level = "WARN".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config_returns_clear_error() {
        let result = CoreConfig::load("/nonexistent/path/shopcore.yaml");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigLoadError::FileNotFound { .. }));
        assert!(err.to_string().contains("not found"));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: syntax: [").unwrap();
        let err = CoreConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Load(_)));
    }

    #[test]
    fn test_sections_convert_to_primitive_configs() {
        // Arrange
        let mut config = CoreConfig::default();
        config.batch.wait_ms = 20;
        config.batch.max_size = Some(10);
        config.partition.max_batch_time_ms = 2;
        config.cache.ttl_ms = 1_500;
        config.resource.revalidate_in_background = true;
        config.resource.evict_after_failures = Some(4);
        config.resource.failure_streak_ttl_ms = 30_000;
        config.logging.json = true;
        config.logging.level = "DEBUG".to_string();

        // Act / Assert
        assert_eq!(
            config.batch.window_config(),
            BatchWindowConfig::default()
                .with_wait(Duration::from_millis(20))
                .with_max_size(10)
        );
        assert_eq!(
            config.partition.partition_config(),
            PartitionConfig::default().with_max_batch_time(Duration::from_millis(2))
        );
        assert_eq!(config.cache.ttl(), Duration::from_millis(1_500));
        assert_eq!(
            config.resource.resource_config(),
            ResourceConfig::default()
                .with_background_revalidation(true)
                .with_evict_after_failures(4)
                .with_failure_streak_ttl(Duration::from_secs(30))
        );

        let logging = LoggingConfig::from(&config.logging);
        assert!(logging.json_format);
        assert_eq!(logging.default_level, Level::DEBUG);
    }
}
