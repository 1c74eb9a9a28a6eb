//! Unified error handling.
//!
//! `IpWatchError` is the single error type surfaced by the library. Note that
//! enrichment failures are *not* represented here at the public boundary: the
//! orchestrator absorbs them into absent geo data or an abuse `error` marker.
//! The variants below cover what can still go wrong around it:
//!   * invalid user / message input
//!   * persistence (state file I/O, JSON decoding)
//!   * the store's writer task having shut down
//!   * network failures inside the lookup sources (mapped before they escape)
//!
//! Categories are coarse on purpose so the CLI can map them onto exit codes
//! and log fields:
//!   - Input: user / data validation issues
//!   - Network: transient or remote-service problems
//!   - Parse: data-format decoding issues
//!   - Storage: durable state could not be read or written
//!   - Internal: logic bugs or unexpected states

use std::io;
use std::net::AddrParseError;

use thiserror::Error;

use crate::config::ConfigError;

/// High-level classification for logging / exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Network,
    Parse,
    Storage,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Input => "input",
            ErrorCategory::Network => "network",
            ErrorCategory::Parse => "parse",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Primary library error type.
#[derive(Error, Debug)]
pub enum IpWatchError {
    // ------------------------ Input / Validation ----------------------------
    #[error("Invalid IPv4 address: {ip}")]
    InvalidIpAddress { ip: String },

    #[error("Invalid tab id: {value}")]
    InvalidTabId { value: String },

    #[error("Invalid address range '{range}': {reason}")]
    InvalidRange { range: String, reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // ----------------------------- Network ----------------------------------
    #[error("Network error during {operation} for '{target}': {source}")]
    Network {
        operation: String,
        target: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{service} responded with HTTP {status}")]
    HttpStatus { service: String, status: u16 },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    // ---------------------------- Parsing -----------------------------------
    #[error("Failed to decode {context}: {source}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ----------------------------- Storage ----------------------------------
    #[error("I/O error during {operation} on {path}: {source}")]
    Io {
        path: String,
        operation: String,
        #[source]
        source: io::Error,
    },

    #[error("Address store is no longer running")]
    StoreClosed,

    // ---------------------------- Internal ----------------------------------
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl IpWatchError {
    /// Categorize the error for logging / exit codes.
    pub fn category(&self) -> ErrorCategory {
        use IpWatchError::*;
        match self {
            InvalidIpAddress { .. }
            | InvalidTabId { .. }
            | InvalidRange { .. }
            | Configuration { .. } => ErrorCategory::Input,

            Network { .. } | HttpStatus { .. } | Timeout { .. } => ErrorCategory::Network,

            Serialization { .. } => ErrorCategory::Parse,

            Io { .. } | StoreClosed => ErrorCategory::Storage,

            Internal { .. } => ErrorCategory::Internal,
        }
    }

    // ---------------------------- Constructors -----------------------------

    pub fn invalid_ip(ip: impl Into<String>) -> Self {
        Self::InvalidIpAddress { ip: ip.into() }
    }

    pub fn invalid_tab(value: impl Into<String>) -> Self {
        Self::InvalidTabId {
            value: value.into(),
        }
    }

    pub fn invalid_range(range: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            range: range.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn network(
        operation: impl Into<String>,
        target: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Network {
            operation: operation.into(),
            target: target.into(),
            source: source.into(),
        }
    }

    pub fn http_status(service: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            service: service.into(),
            status,
        }
    }

    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    pub fn io(path: impl Into<String>, operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    pub fn internal_with(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Public result alias.
pub type Result<T> = std::result::Result<T, IpWatchError>;

/// Map standard IO errors into the `Io` variant (generic context).
impl From<io::Error> for IpWatchError {
    fn from(e: io::Error) -> Self {
        IpWatchError::Io {
            path: "<unknown>".into(),
            operation: "unspecified".into(),
            source: e,
        }
    }
}

impl From<AddrParseError> for IpWatchError {
    fn from(e: AddrParseError) -> Self {
        IpWatchError::InvalidIpAddress { ip: e.to_string() }
    }
}

impl From<serde_json::Error> for IpWatchError {
    fn from(e: serde_json::Error) -> Self {
        IpWatchError::Serialization {
            context: "JSON document".into(),
            source: e,
        }
    }
}

impl From<ConfigError> for IpWatchError {
    fn from(e: ConfigError) -> Self {
        IpWatchError::Configuration {
            message: e.to_string(),
        }
    }
}

/// Extension trait for enriching IO results with path + operation context.
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<String>, operation: impl Into<String>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, io::Error> {
    fn with_path(self, path: impl Into<String>, operation: impl Into<String>) -> Result<T> {
        self.map_err(|e| IpWatchError::io(path.into(), operation.into(), e))
    }
}
