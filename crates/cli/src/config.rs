//! Configuration loading from msgtail.toml.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tail::{NewTablePolicy, TailConfig};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Account data directory holding `db_storage/message`.
    pub data_dir: Option<PathBuf>,

    /// Own handle. Derived from the data directory name when unset.
    pub self_handle: Option<String>,

    /// Poll period in milliseconds.
    pub period_ms: u64,

    /// Dispatch pool size.
    pub workers: usize,

    /// Per-worker queue capacity.
    pub queue_capacity: usize,

    /// Starting cursor for tables created while running.
    pub new_tables: NewTablePolicy,

    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Raw hex key for encrypted stores. Only applied with the
    /// `sqlcipher` feature.
    pub key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let tail = TailConfig::default();
        Self {
            data_dir: None,
            self_handle: None,
            period_ms: tail.period.as_millis() as u64,
            workers: tail.workers,
            queue_capacity: tail.queue_capacity,
            new_tables: tail.new_tables,
            log_level: "info".to_string(),
            key: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period_ms == 0 {
            return Err(ConfigError::Invalid("period_ms must be positive"));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be positive"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be positive"));
        }
        Ok(())
    }

    /// The data directory, which must be set by file or flag.
    pub fn data_dir(&self) -> Result<&Path, ConfigError> {
        self.data_dir.as_deref().ok_or(ConfigError::MissingDataDir)
    }

    /// Settings for the tail loop.
    pub fn tail(&self) -> TailConfig {
        TailConfig {
            period: Duration::from_millis(self.period_ms),
            new_tables: self.new_tables,
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            ..TailConfig::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(&'static str),

    #[error("data directory not configured: set data_dir or pass --data-dir")]
    MissingDataDir,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.period_ms, 100);
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.new_tables, NewTablePolicy::Replay);
        assert_eq!(config.log_level, "info");
        assert!(matches!(config.data_dir(), Err(ConfigError::MissingDataDir)));
    }

    #[test]
    fn test_full_file() {
        let config = Config::parse(
            r#"
            data_dir = "/data/wxid_me_ab12"
            self_handle = "wxid_me"
            period_ms = 250
            workers = 2
            queue_capacity = 16
            new_tables = "skip"
            log_level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir().unwrap(), Path::new("/data/wxid_me_ab12"));
        assert_eq!(config.self_handle.as_deref(), Some("wxid_me"));

        let tail = config.tail();
        assert_eq!(tail.period, Duration::from_millis(250));
        assert_eq!(tail.workers, 2);
        assert_eq!(tail.queue_capacity, 16);
        assert_eq!(tail.new_tables, NewTablePolicy::Skip);
        assert_eq!(tail.settle, tail::DEFAULT_SETTLE);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            Config::parse("workers = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("new_tables = \"sometimes\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            Config::parse("perod_ms = 5"),
            Err(ConfigError::Parse(_))
        ));
    }
}
