//! Error handling for the camscan engine
//!
//! Two layers: [`ScanError`] is what callers of the public API see, and it is
//! only ever returned for structural problems or I/O around configuration.
//! [`ProbeError`] describes a single failed probe and is flattened into the
//! `auth_error` / `error_message` string of the result it belongs to.

use std::time::Duration;
use thiserror::Error;

/// Main error type for scanning operations
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid IP range: {0}")]
    InvalidRange(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Port range error: {0}")]
    PortRangeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid intensity level: {0}")]
    InvalidIntensity(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error("Timeout error")]
    TimeoutError,
}

impl ScanError {
    /// Structural errors abort a run before any work is dispatched.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ScanError::InvalidRange(_)
                | ScanError::InvalidTarget(_)
                | ScanError::PortRangeError(_)
                | ScanError::ConfigError(_)
                | ScanError::InvalidIntensity(_)
                | ScanError::ParseError(_)
        )
    }
}

/// Failure of a single probe or authentication attempt.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connection refused")]
    Refused,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("operation timed out ({0:?})")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("credentials rejected ({0})")]
    AuthRejected(String),

    #[error("cancelled")]
    Cancelled,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    pub(crate) fn from_connect(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::ConnectionRefused {
            ProbeError::Refused
        } else {
            ProbeError::Connect(err.to_string())
        }
    }
}

/// Fixed error text written by the coordinator when a tester overruns its deadline.
///
/// The default 12 second deadline renders as `"timeout after 12s"`.
pub fn auth_timeout_message(deadline: Duration) -> String {
    let millis = deadline.as_millis();
    if millis % 1000 == 0 {
        format!("timeout after {}s", millis / 1000)
    } else {
        format!("timeout after {}ms", millis)
    }
}

/// Recognise the coordinator timeout text produced by [`auth_timeout_message`].
pub fn is_auth_timeout(message: &str) -> bool {
    message.starts_with("timeout after ")
}

impl From<std::net::AddrParseError> for ScanError {
    fn from(e: std::net::AddrParseError) -> Self {
        ScanError::InvalidTarget(e.to_string())
    }
}

impl From<std::num::ParseIntError> for ScanError {
    fn from(e: std::num::ParseIntError) -> Self {
        ScanError::ParseError(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ScanError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ScanError::TimeoutError
    }
}

impl From<toml::de::Error> for ScanError {
    fn from(e: toml::de::Error) -> Self {
        ScanError::ConfigError(format!("Failed to parse TOML: {}", e))
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(e: reqwest::Error) -> Self {
        ScanError::HttpClientError(e.to_string())
    }
}
