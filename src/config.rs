//! Configuration management for ipwatch.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `IPWATCH_*` environment variables, then command-line flags. Lookup
//! endpoints and timeouts, the state file location, the excluded address
//! ranges and output preferences all live here.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::errors::Result as IpResult;
use crate::netutil::{AddressPolicy, DEFAULT_EXCLUDED_RANGES, Ipv4Range};
use crate::output::OutputFormat;
use crate::sources::geo::DEFAULT_GEO_ENDPOINT;
use crate::sources::reputation::{DEFAULT_ABUSE_ENDPOINT, DEFAULT_MAX_AGE_DAYS};

/// Main configuration structure for ipwatch.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Lookup endpoints and timeouts
    pub network: NetworkConfig,

    /// Where sightings and the API key are persisted
    pub storage: StorageConfig,

    /// Addresses never recorded
    pub filter: FilterConfig,

    /// Output preferences
    pub output: OutputConfig,
}

/// Network-related configuration options
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Geolocation service base URL (the address is appended as a path segment)
    pub geo_endpoint: String,

    /// Reputation check URL
    pub abuse_endpoint: String,

    /// Upper bound on a geolocation lookup, in seconds
    pub geo_timeout_secs: u64,

    /// Upper bound on a reputation lookup, in seconds
    pub abuse_timeout_secs: u64,

    /// TCP connect timeout shared by both sources, in seconds
    pub connect_timeout_secs: u64,

    /// Report window requested from the reputation service
    pub max_age_days: u32,

    pub user_agent: String,
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// JSON state file; `None` keeps everything in memory
    pub state_file: Option<PathBuf>,
}

/// Address filtering configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// CIDR ranges excluded from extraction
    pub excluded_ranges: Vec<String>,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub format: OutputFormat,

    /// Allow ANSI colors in styled output
    pub color: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            geo_endpoint: DEFAULT_GEO_ENDPOINT.to_string(),
            abuse_endpoint: DEFAULT_ABUSE_ENDPOINT.to_string(),
            geo_timeout_secs: 10,
            abuse_timeout_secs: 10,
            connect_timeout_secs: 5,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            user_agent: format!("{}/{}", crate::NAME, crate::VERSION),
        }
    }
}

impl NetworkConfig {
    pub fn geo_timeout(&self) -> Duration {
        Duration::from_secs(self.geo_timeout_secs)
    }

    pub fn abuse_timeout(&self) -> Duration {
        Duration::from_secs(self.abuse_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            excluded_ranges: DEFAULT_EXCLUDED_RANGES
                .iter()
                .map(|r| r.to_string())
                .collect(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Styled,
            color: true,
        }
    }
}

/// `<data dir>/ipwatch/state.json`, when the platform has a data directory.
pub fn default_state_file() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join(crate::NAME).join("state.json"))
}

/// `<config dir>/ipwatch/config.toml`, when the platform has a config directory.
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(crate::NAME).join("config.toml"))
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the file and environment layers. An explicit path must exist;
    /// the per-user default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_file() {
                Some(default) if default.is_file() => Self::from_file(&default)?,
                _ => Self::default(),
            },
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            format: "TOML".to_string(),
            reason: e.to_string(),
        })
    }

    /// Load configuration from environment variables on top of defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay `IPWATCH_*` environment variables. Unparsable values are
    /// ignored.
    pub fn apply_env(&mut self) {
        if let Ok(endpoint) = std::env::var("IPWATCH_GEO_ENDPOINT") {
            self.network.geo_endpoint = endpoint;
        }

        if let Ok(endpoint) = std::env::var("IPWATCH_ABUSE_ENDPOINT") {
            self.network.abuse_endpoint = endpoint;
        }

        if let Ok(timeout) = std::env::var("IPWATCH_GEO_TIMEOUT_SECS")
            && let Ok(secs) = timeout.parse::<u64>()
        {
            self.network.geo_timeout_secs = secs;
        }

        if let Ok(timeout) = std::env::var("IPWATCH_ABUSE_TIMEOUT_SECS")
            && let Ok(secs) = timeout.parse::<u64>()
        {
            self.network.abuse_timeout_secs = secs;
        }

        if let Ok(days) = std::env::var("IPWATCH_MAX_AGE_DAYS")
            && let Ok(d) = days.parse::<u32>()
        {
            self.network.max_age_days = d;
        }

        if let Ok(state) = std::env::var("IPWATCH_STATE_FILE") {
            self.storage.state_file = (!state.trim().is_empty()).then(|| PathBuf::from(state));
        }

        if let Ok(ranges) = std::env::var("IPWATCH_EXCLUDED_RANGES") {
            self.filter.excluded_ranges = ranges
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(format) = std::env::var("IPWATCH_FORMAT")
            && let Ok(f) = format.parse::<OutputFormat>()
        {
            self.output.format = f;
        }
    }

    /// Merge with CLI arguments, giving CLI precedence
    pub fn merge_with_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(ref state) = cli.state {
            self.storage.state_file = Some(state.clone());
        }

        if cli.memory {
            self.storage.state_file = None;
        }

        if let Some(format) = cli.format {
            self.output.format = format;
        }

        if cli.no_color {
            self.output.color = false;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("network.geo_endpoint", &self.network.geo_endpoint),
            ("network.abuse_endpoint", &self.network.abuse_endpoint),
        ] {
            if let Err(e) = reqwest::Url::parse(value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.clone(),
                    reason: format!("Not a valid URL ({e})"),
                });
            }
        }

        for (field, secs) in [
            ("network.geo_timeout_secs", self.network.geo_timeout_secs),
            ("network.abuse_timeout_secs", self.network.abuse_timeout_secs),
            (
                "network.connect_timeout_secs",
                self.network.connect_timeout_secs,
            ),
        ] {
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                    reason: "Timeout must be greater than 0".to_string(),
                });
            }
        }

        if !(1..=365).contains(&self.network.max_age_days) {
            return Err(ConfigError::InvalidValue {
                field: "network.max_age_days".to_string(),
                value: self.network.max_age_days.to_string(),
                reason: "Report window must be between 1 and 365 days".to_string(),
            });
        }

        if self.network.user_agent.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "network.user_agent".to_string(),
            });
        }

        for range in &self.filter.excluded_ranges {
            if let Err(e) = range.parse::<Ipv4Range>() {
                return Err(ConfigError::InvalidValue {
                    field: "filter.excluded_ranges".to_string(),
                    value: range.clone(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Extraction policy built from the excluded ranges.
    pub fn policy(&self) -> IpResult<AddressPolicy> {
        AddressPolicy::from_cidrs(&self.filter.excluded_ranges)
    }
}

/// Configuration-related errors
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read configuration file
    FileRead {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse configuration format
    Parse { format: String, reason: String },

    /// Invalid configuration value
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Missing required configuration
    MissingRequired { field: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead { path, source } => {
                write!(f, "Failed to read config file '{}': {}", path, source)
            }
            ConfigError::Parse { format, reason } => {
                write!(f, "Failed to parse {} config: {}", format, reason)
            }
            ConfigError::InvalidValue {
                field,
                value,
                reason,
            } => {
                write!(f, "Invalid value '{}' for '{}': {}", value, field, reason)
            }
            ConfigError::MissingRequired { field } => {
                write!(f, "Missing required configuration field: {}", field)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::FileRead { source, .. } => Some(source),
            _ => None,
        }
    }
}
