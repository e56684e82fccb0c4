//! Metadata retrieval error types
//!
//! [`ConfigError`] covers everything that can go wrong while fetching, parsing
//! or policy-checking identity-provider metadata. Token validation failures
//! use [`ValidationError`](crate::validation::ValidationError) instead.

use std::time::Duration;
use thiserror::Error;

/// Result alias for metadata operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while obtaining trust configuration
///
/// The type is `Clone` so the cache can keep the last failure around and hand
/// it to callers that arrive while a retry is still being backed off.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// Transport, HTTP status or file system failure
    #[error("failed to fetch metadata from '{address}': {reason}")]
    Fetch {
        /// Address the document was requested from
        address: String,
        /// Human readable cause
        reason: String,
        /// HTTP status code, when the endpoint answered
        status: Option<u16>,
    },

    /// The document could not be parsed
    #[error("failed to parse metadata document: {0}")]
    Parse(String),

    /// The document parsed but does not satisfy the configured policy
    #[error("metadata rejected by policy: {0}")]
    Invalid(String),

    /// Retrieval did not finish within the caller supplied deadline
    #[error("metadata retrieval from '{address}' timed out after {timeout:?}")]
    Timeout {
        /// Address the document was requested from
        address: String,
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// Retrieval was cancelled by the caller
    #[error("metadata retrieval was cancelled")]
    Cancelled,
}

impl ConfigError {
    /// Create a fetch error without an HTTP status
    pub fn fetch(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            address: address.into(),
            reason: reason.into(),
            status: None,
        }
    }

    /// Create a fetch error for a non-success HTTP status
    pub fn status(address: impl Into<String>, status: u16) -> Self {
        Self::Fetch {
            address: address.into(),
            reason: format!("endpoint returned status {status}"),
            status: Some(status),
        }
    }

    /// Create a parse error
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse(reason.into())
    }

    /// Create a policy violation error
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }

    /// Stable tag naming the error class, used for telemetry dimensions
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch_error",
            Self::Parse(_) => "parse_error",
            Self::Invalid(_) => "configuration_invalid",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Errors raised when building a [`RefreshPolicy`](crate::cache::RefreshPolicy)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// The floor between fetches is longer than the proactive refresh period
    #[error(
        "minimum refresh interval ({minimum:?}) must not exceed automatic refresh interval ({automatic:?})"
    )]
    MinimumExceedsAutomatic {
        /// Configured minimum refresh interval
        minimum: Duration,
        /// Configured automatic refresh interval
        automatic: Duration,
    },

    /// The automatic refresh interval was zero
    #[error("automatic refresh interval must be greater than zero")]
    ZeroAutomaticInterval,
}
