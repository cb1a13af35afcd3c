//! Pipeline configuration.
//!
//! Loaded from a JSON file whose keys use camelCase names, then overridden by `TRIPDATA_*`
//! environment variables.
//!
//! ```json
//! {
//!   "directory": "/data/incoming",
//!   "filePattern": "^green_tripdata_.*\\.parquet$",
//!   "scanPeriodMillis": 5000,
//!   "rateLimitPermitsPerSecond": 5000,
//!   "batchSize": 1000,
//!   "outputDirectory": "/data/done",
//!   "errorDirectory": "/data/error",
//!   "sink": { "kind": "table", "schema": "green", "root": "/data/tables" }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::sink::SinkConfig;

/// Default time between directory scans.
pub const DEFAULT_SCAN_PERIOD_MILLIS: u64 = 5_000;

/// Default time the dispatcher gets to drain its queue on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_MILLIS: u64 = 5_000;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "TRIPDATA_";

/// Everything needed to assemble an [`crate::pipeline::IngestionPipeline`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Watched directory.
    pub directory: PathBuf,

    /// Regular expression matched against the whole file name.
    pub file_pattern: String,

    #[serde(default = "default_scan_period_millis")]
    pub scan_period_millis: u64,

    /// Rows admitted per second.
    pub rate_limit_permits_per_second: usize,

    /// Rows per sink delivery.
    pub batch_size: usize,

    pub output_directory: PathBuf,

    pub error_directory: PathBuf,

    #[serde(default = "default_shutdown_grace_millis")]
    pub shutdown_grace_millis: u64,

    pub sink: SinkConfig,
}

fn default_scan_period_millis() -> u64 {
    DEFAULT_SCAN_PERIOD_MILLIS
}

fn default_shutdown_grace_millis() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MILLIS
}

impl PipelineConfig {
    /// Read a config file and apply environment overrides. Does not validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `TRIPDATA_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from any lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            let var = format!("{ENV_PREFIX}{key}");
            lookup(&var).map(|value| (var, value))
        };

        if let Some((_, v)) = get("DIRECTORY") {
            self.directory = PathBuf::from(v);
        }
        if let Some((_, v)) = get("FILE_PATTERN") {
            self.file_pattern = v;
        }
        if let Some((var, v)) = get("SCAN_PERIOD_MILLIS") {
            self.scan_period_millis = parse_env(var, v)?;
        }
        if let Some((var, v)) = get("RATE_LIMIT_PERMITS_PER_SECOND") {
            self.rate_limit_permits_per_second = parse_env(var, v)?;
        }
        if let Some((var, v)) = get("BATCH_SIZE") {
            self.batch_size = parse_env(var, v)?;
        }
        if let Some((_, v)) = get("OUTPUT_DIRECTORY") {
            self.output_directory = PathBuf::from(v);
        }
        if let Some((_, v)) = get("ERROR_DIRECTORY") {
            self.error_directory = PathBuf::from(v);
        }
        if let Some((var, v)) = get("SHUTDOWN_GRACE_MILLIS") {
            self.shutdown_grace_millis = parse_env(var, v)?;
        }
        if let Some((var, v)) = get("SINK_SCHEMA") {
            self.sink.schema = parse_env(var, v)?;
        }
        if let Some((_, v)) = get("SINK_ROOT") {
            self.sink.root = PathBuf::from(v);
        }
        if let Some((_, v)) = get("SINK_INDEX") {
            self.sink.index = Some(v);
        }
        Ok(())
    }

    /// Reject configurations the pipeline could never run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directory.as_os_str().is_empty() {
            return Err(ConfigError::invalid("directory must be set"));
        }
        compile_file_pattern(&self.file_pattern)?;
        if self.scan_period_millis == 0 {
            return Err(ConfigError::invalid("scanPeriodMillis must be > 0"));
        }
        if self.rate_limit_permits_per_second == 0 {
            return Err(ConfigError::invalid("rateLimitPermitsPerSecond must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batchSize must be > 0"));
        }
        if self.batch_size > self.rate_limit_permits_per_second {
            return Err(ConfigError::invalid(format!(
                "batchSize ({}) exceeds rateLimitPermitsPerSecond ({}); no batch could be admitted",
                self.batch_size, self.rate_limit_permits_per_second
            )));
        }
        if self.output_directory.as_os_str().is_empty() || self.error_directory.as_os_str().is_empty() {
            return Err(ConfigError::invalid("outputDirectory and errorDirectory must be set"));
        }
        if self.output_directory == self.directory || self.error_directory == self.directory {
            return Err(ConfigError::invalid(
                "outputDirectory and errorDirectory must differ from the watched directory",
            ));
        }
        Ok(())
    }

    pub fn scan_period(&self) -> Duration {
        Duration::from_millis(self.scan_period_millis)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_millis)
    }
}

fn parse_env<T: FromStr>(var: String, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env { var, value })
}

/// Compile a file-name pattern so that it must match the entire name.
pub fn compile_file_pattern(pattern: &str) -> Result<Regex, ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::invalid("filePattern must not be empty"));
    }
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| ConfigError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}
