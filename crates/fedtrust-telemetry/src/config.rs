//! Telemetry configuration
//!
//! Values can be built in code or deserialized from the service's own
//! configuration file.

use serde::{Deserialize, Serialize};

/// Telemetry configuration
///
/// Use [`TelemetryConfigBuilder`] for ergonomic configuration construction.
///
/// # Example
///
/// ```rust
/// use fedtrust_telemetry::TelemetryConfig;
///
/// let config = TelemetryConfig::builder()
///     .service_name("orders-api")
///     .log_level("info,fedtrust=debug")
///     .build();
/// assert_eq!(config.service_name, "orders-api");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Service name recorded in the startup log line
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Log level filter, overridden by `RUST_LOG` when set
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,
    /// Write logs to stderr instead of stdout
    pub stderr_output: bool,

    /// Port for the Prometheus scrape endpoint
    #[cfg(feature = "prometheus")]
    pub prometheus_port: Option<u16>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "fedtrust-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info,fedtrust=debug".to_string(),
            json_logs: true,
            stderr_output: true,
            #[cfg(feature = "prometheus")]
            prometheus_port: None,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::default()
    }

    /// Install the global subscriber (and exporter, if configured)
    ///
    /// # Errors
    ///
    /// See [`crate::TelemetryGuard::init`].
    pub fn init(self) -> Result<crate::TelemetryGuard, crate::TelemetryError> {
        crate::TelemetryGuard::init(self)
    }
}

/// Builder for [`TelemetryConfig`]
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfigBuilder {
    service_name: Option<String>,
    service_version: Option<String>,
    log_level: Option<String>,
    json_logs: Option<bool>,
    stderr_output: Option<bool>,
    #[cfg(feature = "prometheus")]
    prometheus_port: Option<u16>,
}

impl TelemetryConfigBuilder {
    /// Set the service name
    #[must_use]
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Set the service version
    #[must_use]
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    /// Set the log level filter, e.g. `"warn,fedtrust::cache=debug"`
    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Enable or disable JSON log output
    #[must_use]
    pub fn json_logs(mut self, enabled: bool) -> Self {
        self.json_logs = Some(enabled);
        self
    }

    /// Enable or disable stderr output
    #[must_use]
    pub fn stderr_output(mut self, enabled: bool) -> Self {
        self.stderr_output = Some(enabled);
        self
    }

    /// Serve Prometheus metrics on `port`
    #[cfg(feature = "prometheus")]
    #[cfg_attr(docsrs, doc(cfg(feature = "prometheus")))]
    #[must_use]
    pub fn prometheus_port(mut self, port: u16) -> Self {
        self.prometheus_port = Some(port);
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        let defaults = TelemetryConfig::default();

        TelemetryConfig {
            service_name: self.service_name.unwrap_or(defaults.service_name),
            service_version: self.service_version.unwrap_or(defaults.service_version),
            log_level: self.log_level.unwrap_or(defaults.log_level),
            json_logs: self.json_logs.unwrap_or(defaults.json_logs),
            stderr_output: self.stderr_output.unwrap_or(defaults.stderr_output),
            #[cfg(feature = "prometheus")]
            prometheus_port: self.prometheus_port.or(defaults.prometheus_port),
        }
    }
}
