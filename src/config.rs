/// Run configuration loader - parses aqmon.toml
///
/// Keeps the target state, output layout, pacing and retry limits out of the
/// code so a run can be retargeted without recompiling. Every key has a
/// default, so the file itself is optional; command-line flags are applied
/// on top by the binary.

use crate::ingest::airnow::{self, RetryPolicy, AIRNOW_BASE_URL, DEFAULT_DISTANCE_MILES};
use crate::model::DataKind;
use crate::pipeline::TransportErrorPolicy;
use crate::ratelimit::RateLimitConfig;
use crate::sink::{OutputSchema, DEFAULT_OUTPUT};
use crate::zipcodes::{ZipCodeError, ZipCodeSource, ZipList, ZipRegistry, ZipTable};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "aqmon.toml";

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV_VAR: &str = "AQMON_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("API key file {path} could not be read: {source}")]
    MissingApiKey {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("API key file {0} is empty")]
    EmptyApiKey(PathBuf),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    ZipSource(#[from] ZipCodeError),
}

// ---------------------------------------------------------------------------
// Configuration structures
// ---------------------------------------------------------------------------

/// Root configuration structure for TOML parsing
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AqmonConfig {
    /// State name or abbreviation passed to the ZIP code source.
    pub state: String,
    pub api_key_file: PathBuf,
    pub output: PathBuf,
    pub schema: OutputSchema,
    /// Data kinds fetched for every ZIP code, in this order. Unset means
    /// all three for the full schema and current observations for the
    /// narrow one.
    pub kinds: Option<Vec<DataKind>>,
    /// `yyyy-mm-ddTHH-ZZZZ`; defaults to midnight yesterday (UTC).
    pub historical_date: Option<String>,
    pub distance_miles: u32,
    pub base_url: String,
    /// Keep only these pollutants. Unset means all for the full schema and
    /// CO/SO2/NO2/PM2.5/PM10 for the narrow one.
    pub parameter_filter: Option<Vec<String>>,
    pub transport_errors: TransportErrorPolicy,
    pub workers: usize,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub zip_source: ZipSourceConfig,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitSection,
}

impl Default for AqmonConfig {
    fn default() -> Self {
        Self {
            state: "Florida".to_string(),
            api_key_file: PathBuf::from("api.txt"),
            output: PathBuf::from(DEFAULT_OUTPUT),
            schema: OutputSchema::Full,
            kinds: None,
            historical_date: None,
            distance_miles: DEFAULT_DISTANCE_MILES,
            base_url: AIRNOW_BASE_URL.to_string(),
            parameter_filter: None,
            transport_errors: TransportErrorPolicy::Skip,
            workers: 1,
            log_level: "info".to_string(),
            log_file: None,
            zip_source: ZipSourceConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitSection::default(),
        }
    }
}

/// Where ZIP codes come from: an explicit `codes` list, else a `table` on
/// disk, else the bundled registry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZipSourceConfig {
    pub table: Option<PathBuf>,
    pub codes: Option<Vec<String>>,
}

impl ZipSourceConfig {
    pub fn build(&self) -> Result<Box<dyn ZipCodeSource>, ConfigError> {
        match (&self.codes, &self.table) {
            (Some(codes), _) => Ok(Box::new(ZipList::parse(codes.as_slice())?)),
            (None, Some(table)) => Ok(Box::new(ZipTable::new(table))),
            (None, None) => Ok(Box::new(ZipRegistry)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_seconds: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay_seconds: policy.base_delay.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSection {
    pub window_limit: u32,
    pub window_pause_seconds: u64,
    /// Unset means `window_pause_seconds / window_limit`.
    pub spacing_seconds: Option<f64>,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            window_limit: defaults.window_limit,
            window_pause_seconds: defaults.window_pause.as_secs(),
            spacing_seconds: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Derived settings
// ---------------------------------------------------------------------------

impl AqmonConfig {
    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state.trim().is_empty() && self.zip_source.codes.is_none() {
            return Err(ConfigError::Invalid("state must not be empty".into()));
        }
        if let Some(kinds) = &self.kinds {
            if kinds.is_empty() {
                return Err(ConfigError::Invalid("kinds must list at least one data kind".into()));
            }
            if self.schema == OutputSchema::Narrow {
                if let Some(kind) = kinds.iter().find(|k| **k != DataKind::CurrentObservation) {
                    return Err(ConfigError::Invalid(format!(
                        "the narrow schema only holds {} rows, but kinds includes {}",
                        DataKind::CurrentObservation,
                        kind
                    )));
                }
            }
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.retry.max_retries == 0 {
            return Err(ConfigError::Invalid("retry.max_retries must be at least 1".into()));
        }
        if !self.retry.base_delay_seconds.is_finite() || self.retry.base_delay_seconds < 0.0 {
            return Err(ConfigError::Invalid("retry.base_delay_seconds must be >= 0".into()));
        }
        if self.rate_limit.window_limit == 0 {
            return Err(ConfigError::Invalid("rate_limit.window_limit must be at least 1".into()));
        }
        if let Some(spacing) = self.rate_limit.spacing_seconds {
            if !spacing.is_finite() || spacing < 0.0 {
                return Err(ConfigError::Invalid("rate_limit.spacing_seconds must be >= 0".into()));
            }
        }
        if let Some(date) = &self.historical_date {
            if !airnow::is_valid_historical_date(date) {
                return Err(ConfigError::Invalid(format!(
                    "historical_date '{}' must look like yyyy-mm-ddTHH-ZZZZ",
                    date
                )));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: seconds(self.retry.base_delay_seconds),
        }
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        let window_pause = Duration::from_secs(self.rate_limit.window_pause_seconds);
        let spacing = match self.rate_limit.spacing_seconds {
            Some(secs) => seconds(secs),
            None => RateLimitConfig::even_spacing(self.rate_limit.window_limit, window_pause),
        };
        RateLimitConfig {
            window_limit: self.rate_limit.window_limit,
            window_pause,
            spacing,
        }
    }

    /// Historical `date` parameter for a run started on `today`.
    pub fn historical_date_for(&self, today: NaiveDate) -> String {
        self.historical_date
            .clone()
            .unwrap_or_else(|| airnow::default_historical_date(today))
    }

    /// Data kinds in effect for the configured schema.
    pub fn effective_kinds(&self) -> Vec<DataKind> {
        match (&self.kinds, self.schema) {
            (Some(kinds), _) => kinds.clone(),
            (None, OutputSchema::Full) => DataKind::ALL.to_vec(),
            (None, OutputSchema::Narrow) => vec![DataKind::CurrentObservation],
        }
    }

    /// Pollutant filter in effect for the configured schema.
    pub fn effective_parameter_filter(&self) -> Option<Vec<String>> {
        self.parameter_filter.clone().or_else(|| {
            self.schema
                .default_parameters()
                .map(|params| params.iter().map(|p| p.to_string()).collect())
        })
    }
}

/// Negative and NaN values clamp to zero, overflow to `Duration::MAX`.
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parses configuration from TOML text.
pub fn parse_config(contents: &str, origin: &Path) -> Result<AqmonConfig, ConfigError> {
    toml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
    })
}

/// Loads the run configuration.
///
/// An explicit `path` must exist. Without one, `$AQMON_CONFIG` is used if
/// set, then `aqmon.toml` in the working directory if present, and
/// otherwise the built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<AqmonConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match std::env::var_os(CONFIG_ENV_VAR) {
            Some(p) => PathBuf::from(p),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    return Ok(AqmonConfig::default());
                }
                default
            }
        },
    };

    let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    parse_config(&contents, &path)
}

/// Reads the AirNow API key: the first line of `path`, trimmed.
///
/// A missing or blank key file is an error; the run must not start
/// without a key.
pub fn read_api_key(path: &Path) -> Result<String, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::MissingApiKey {
        path: path.to_path_buf(),
        source,
    })?;

    let key = contents.lines().next().unwrap_or("").trim();
    if key.is_empty() {
        return Err(ConfigError::EmptyApiKey(path.to_path_buf()));
    }
    Ok(key.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
