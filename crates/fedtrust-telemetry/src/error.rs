//! Telemetry error types

use thiserror::Error;

/// Errors raised while installing logging or metrics
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Invalid configuration
    #[error("Invalid telemetry configuration: {0}")]
    InvalidConfiguration(String),

    /// A global subscriber is already installed
    #[error("Tracing subscriber error: {0}")]
    TracingError(String),

    /// Metrics exporter failed to start
    #[cfg(feature = "prometheus")]
    #[error("Metrics error: {0}")]
    MetricsError(String),
}

/// Result type for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;
