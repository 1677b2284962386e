//! Configuration management for placestat
//!
//! TOML file support with environment variable overrides and defaults that
//! match the r/place canvas history export:
//!
//! ```toml
//! [input]
//! path = "2022_place_canvas_history.csv.gzip"
//! timestamp_column = 0
//!
//! [[input.dimensions]]
//! name = "color"
//! column = 2
//!
//! [engine]
//! chunk_size = 100000
//! top_k = 1
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::decoder::Schema;
use crate::engine::EngineConfig;
use crate::error::{Error, Result};
use crate::reader::ReaderOptions;
use crate::types::DimensionSpec;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Input stream layout
    #[serde(default)]
    pub input: InputConfig,

    /// Engine tuning
    #[serde(default)]
    pub engine: EngineSection,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Input stream configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    /// Path to the CSV or gzip-compressed CSV file
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Field delimiter
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// First line is a header
    #[serde(default = "default_true")]
    pub has_header: bool,

    /// Column holding the event timestamp
    #[serde(default)]
    pub timestamp_column: usize,

    /// Tallied dimensions
    #[serde(default = "default_dimensions")]
    pub dimensions: Vec<DimensionSpec>,
}

/// Engine configuration section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSection {
    /// Rows per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Ranked values reported per dimension
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Abort after more malformed rows than this
    #[serde(default)]
    pub max_malformed_rows: Option<u64>,

    /// Retry a failed sub-chunk once
    #[serde(default = "default_true")]
    pub retry_failed_subchunks: bool,

    /// Abort runs that take longer than this many seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_delimiter() -> char { ',' }
fn default_chunk_size() -> usize { 100_000 }
fn default_workers() -> usize { num_cpus::get() }
fn default_top_k() -> usize { 1 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

fn default_dimensions() -> Vec<DimensionSpec> {
    vec![
        DimensionSpec::new("color", 2),
        DimensionSpec::new("coordinate", 3),
    ]
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: None,
            delimiter: default_delimiter(),
            has_header: true,
            timestamp_column: 0,
            dimensions: default_dimensions(),
        }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            workers: default_workers(),
            top_k: default_top_k(),
            max_malformed_rows: None,
            retry_failed_subchunks: true,
            timeout_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Input
        if let Ok(path) = std::env::var("PLACESTAT_INPUT") {
            self.input.path = Some(PathBuf::from(path));
        }

        // Engine
        if let Ok(size) = std::env::var("PLACESTAT_CHUNK_SIZE") {
            if let Ok(n) = size.parse() {
                self.engine.chunk_size = n;
            }
        }
        if let Ok(workers) = std::env::var("PLACESTAT_WORKERS") {
            if let Ok(n) = workers.parse() {
                self.engine.workers = n;
            }
        }
        if let Ok(k) = std::env::var("PLACESTAT_TOP_K") {
            if let Ok(n) = k.parse() {
                self.engine.top_k = n;
            }
        }

        // Logging
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.engine.chunk_size == 0 {
            return Err(invalid("Chunk size must be > 0"));
        }
        if self.engine.workers == 0 {
            return Err(invalid("Worker count must be > 0"));
        }
        if self.engine.top_k == 0 {
            return Err(invalid("top_k must be > 0"));
        }
        if self.engine.timeout_secs == Some(0) {
            return Err(invalid("Timeout must be > 0 seconds"));
        }

        if self.input.dimensions.is_empty() {
            return Err(invalid("At least one dimension must be configured"));
        }
        for (i, dim) in self.input.dimensions.iter().enumerate() {
            if dim.name.trim().is_empty() {
                return Err(invalid("Dimension names cannot be empty"));
            }
            if dim.column == self.input.timestamp_column {
                return Err(Error::Configuration(format!(
                    "Dimension '{}' reads the timestamp column {}",
                    dim.name, dim.column
                )));
            }
            if self.input.dimensions[..i].iter().any(|d| d.name == dim.name) {
                return Err(Error::Configuration(format!(
                    "Dimension '{}' is configured twice",
                    dim.name
                )));
            }
        }

        if matches!(self.input.delimiter, '"' | '\n' | '\r') {
            return Err(invalid("Delimiter cannot be a quote or line break"));
        }

        Ok(())
    }

    /// Configured input path
    pub fn input_path(&self) -> Result<&Path> {
        self.input
            .path
            .as_deref()
            .ok_or_else(|| invalid("No input path configured"))
    }

    /// Row schema for the decoder
    pub fn schema(&self) -> Schema {
        Schema::new(self.input.timestamp_column, self.input.dimensions.clone())
    }

    /// Options for the chunk reader
    pub fn reader_options(&self) -> ReaderOptions {
        let options = ReaderOptions::default()
            .with_chunk_size(self.engine.chunk_size)
            .with_delimiter(self.input.delimiter);
        if self.input.has_header {
            options
        } else {
            options.without_header()
        }
    }

    /// Options for the aggregation engine
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default()
            .with_workers(self.engine.workers)
            .with_top_k(self.engine.top_k);
        if let Some(limit) = self.engine.max_malformed_rows {
            config = config.with_max_malformed_rows(limit);
        }
        if !self.engine.retry_failed_subchunks {
            config = config.without_retry();
        }
        if let Some(secs) = self.engine.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        config
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents).map_err(|e| {
            Error::Configuration(format!("Failed to write config file {}: {}", path.display(), e))
        })
    }
}

fn invalid(message: &str) -> Error {
    Error::Configuration(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.chunk_size, 100_000);
        assert_eq!(config.engine.top_k, 1);
        assert!(config.engine.workers > 0);
        assert_eq!(config.input.timestamp_column, 0);
        assert_eq!(config.input.dimensions[0], DimensionSpec::new("color", 2));
        assert_eq!(config.input.dimensions[1], DimensionSpec::new("coordinate", 3));
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let mut config = Config::default();
        config.engine.chunk_size = 0;
        assert!(config.validate().unwrap_err().is_configuration());

        let mut config = Config::default();
        config.input.dimensions.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.input.dimensions.push(DimensionSpec::new("color", 1));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.input.dimensions.push(DimensionSpec::new("when", 0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_input_path() {
        let config = Config::default();
        assert!(config.input_path().unwrap_err().is_configuration());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [input]
            path = "data.csv.gz"
            delimiter = ";"

            [[input.dimensions]]
            name = "user"
            column = 1
            normalize = true

            [engine]
            top_k = 3
            max_malformed_rows = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.input.path.as_deref(), Some(Path::new("data.csv.gz")));
        assert_eq!(config.input.delimiter, ';');
        assert_eq!(config.input.dimensions.len(), 1);
        assert!(config.input.dimensions[0].normalize);
        assert_eq!(config.engine.top_k, 3);
        assert_eq!(config.engine.chunk_size, 100_000);
        assert_eq!(config.engine_config().max_malformed_rows, Some(10));
        assert_eq!(config.reader_options().delimiter, ';');
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("placestat.toml");

        let mut config = Config::default();
        config.input.path = Some(PathBuf::from("canvas.csv.gz"));
        config.engine.timeout_secs = Some(30);
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.input.path, config.input.path);
        assert_eq!(loaded.input.dimensions, config.input.dimensions);
        assert_eq!(loaded.engine.timeout_secs, Some(30));
        assert_eq!(loaded.engine_config().timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_unreadable_file() {
        let err = Config::from_file("/nonexistent/placestat.toml").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("PLACESTAT_TOP_K", "5");
        let config = Config::from_env();
        assert_eq!(config.engine.top_k, 5);
        std::env::remove_var("PLACESTAT_TOP_K");
    }
}
