//! Runtime configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration file.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SNAPLEN: i32 = 65535;
pub const DEFAULT_TIMEOUT_MS: i32 = 1000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;
pub const DEFAULT_MAX_THREADS: usize = 16;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;
/// Capture loop, dispatcher and at least one sink.
pub const MIN_POOL_THREADS: usize = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Capture handle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    pub snaplen: i32,
    pub promiscuous: bool,
    /// Read timeout; also bounds how long a stop request waits for the
    /// capture loop. Must be positive: libpcap treats 0 as "wait forever".
    pub timeout_ms: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            snaplen: DEFAULT_SNAPLEN,
            promiscuous: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub min_threads: usize,
    pub max_threads: usize,
    pub idle_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_threads: 0,
            max_threads: DEFAULT_MAX_THREADS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnifferConfig {
    pub capture: CaptureConfig,
    pub dispatch_queue_capacity: usize,
    pub sink_queue_capacity: usize,
    pub pool: PoolConfig,
}

impl Default for SnifferConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            dispatch_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sink_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pool: PoolConfig::default(),
        }
    }
}

impl SnifferConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.snaplen <= 0 {
            return Err(ConfigError::Invalid(format!(
                "capture.snaplen must be positive, got {}",
                self.capture.snaplen
            )));
        }
        if self.capture.timeout_ms <= 0 {
            return Err(ConfigError::Invalid(format!(
                "capture.timeout_ms must be positive, got {}",
                self.capture.timeout_ms
            )));
        }
        if self.dispatch_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "dispatch_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.sink_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "sink_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.pool.max_threads < MIN_POOL_THREADS {
            return Err(ConfigError::Invalid(format!(
                "pool.max_threads must be at least {}, got {}",
                MIN_POOL_THREADS, self.pool.max_threads
            )));
        }
        if self.pool.min_threads > self.pool.max_threads {
            return Err(ConfigError::Invalid(format!(
                "pool.min_threads ({}) exceeds pool.max_threads ({})",
                self.pool.min_threads, self.pool.max_threads
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, SnifferConfig};
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = SnifferConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.snaplen, 65535);
        assert_eq!(config.pool.max_threads, 16);
    }

    #[test]
    fn empty_object_parses_to_defaults() {
        let config: SnifferConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SnifferConfig::default());
    }

    #[test]
    fn partial_file_overrides_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"sink_queue_capacity": 8, "capture": {{"promiscuous": true}}}}"#
        )
        .unwrap();
        let config = SnifferConfig::from_path(file.path()).unwrap();
        assert_eq!(config.sink_queue_capacity, 8);
        assert!(config.capture.promiscuous);
        assert_eq!(config.capture.timeout_ms, 1000);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_json::from_str::<SnifferConfig>(r#"{"queue": 1}"#).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = SnifferConfig::default();
        config.dispatch_queue_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = SnifferConfig::default();
        config.pool.max_threads = 2;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = SnifferConfig::default();
        config.pool.min_threads = 20;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = SnifferConfig::default();
        config.capture.snaplen = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_read_timeout_is_rejected() {
        let mut config = SnifferConfig::default();
        config.capture.timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("capture.timeout_ms"));

        config.capture.timeout_ms = -5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.capture.timeout_ms = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = SnifferConfig::from_path(std::path::Path::new("/nonexistent/serialsniff.json"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
