//! Telemetry initialization
//!
//! Provides the [`TelemetryGuard`] that owns the installed subscriber state.

use std::sync::Arc;

use fedtrust::telemetry::TelemetrySink;
use tracing::info;
#[cfg(feature = "prometheus")]
use tracing::warn;
use tracing_subscriber::{
    Registry, filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::{TelemetryConfig, TelemetryError, TracingTelemetry};

/// Handle returned by [`TelemetryConfig::init`]
///
/// Keep it alive for the lifetime of the service. It also hands out the
/// [`TelemetrySink`] that matches what was installed, ready to pass to
/// `ConfigurationCache::builder(..).telemetry(..)` and
/// `TokenValidator::with_telemetry`.
///
/// ```rust,ignore
/// let guard = TelemetryConfig::default().init()?;
/// let cache = ConfigurationCache::builder(address, source, OpenIdConnectRetriever::new())
///     .telemetry(guard.sink())
///     .build();
/// ```
pub struct TelemetryGuard {
    config: TelemetryConfig,
    #[cfg(feature = "prometheus")]
    metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl std::fmt::Debug for TelemetryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("TelemetryGuard");
        debug.field("config", &self.config);
        #[cfg(feature = "prometheus")]
        debug.field("metrics_exporter", &self.metrics_handle.is_some());
        debug.finish()
    }
}

impl TelemetryGuard {
    /// Install the global subscriber and, when configured, the Prometheus exporter
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidConfiguration`] for an unparsable
    /// log filter, [`TelemetryError::TracingError`] when a global subscriber
    /// is already installed, and `MetricsError` when the exporter cannot bind.
    /// A configured Prometheus port requires a running tokio runtime, which
    /// drives the scrape endpoint.
    pub fn init(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        init_subscriber(&config)?;

        #[cfg(feature = "prometheus")]
        let metrics_handle = match config.prometheus_port {
            Some(port) => Some(init_prometheus(port)?),
            None => None,
        };

        info!(
            service_name = %config.service_name,
            service_version = %config.service_version,
            library = fedtrust::telemetry::LIBRARY_ID,
            json_logs = config.json_logs,
            "fedtrust telemetry initialized"
        );

        Ok(Self {
            config,
            #[cfg(feature = "prometheus")]
            metrics_handle,
        })
    }

    /// Get the service name
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Sink for caches and validators
    ///
    /// Metrics when an exporter is running, log events otherwise.
    #[must_use]
    pub fn sink(&self) -> Arc<dyn TelemetrySink> {
        #[cfg(feature = "prometheus")]
        if self.metrics_handle.is_some() {
            return Arc::new(fedtrust::telemetry::MetricsTelemetry::new());
        }
        Arc::new(TracingTelemetry)
    }

    /// Current metrics in Prometheus text format
    #[cfg(feature = "prometheus")]
    #[cfg_attr(docsrs, doc(cfg(feature = "prometheus")))]
    #[must_use]
    pub fn render_metrics(&self) -> Option<String> {
        self.metrics_handle.as_ref().map(|handle| handle.render())
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        info!(service_name = %self.config.service_name, "Shutting down fedtrust telemetry");
    }
}

/// Parse the filter, preferring `RUST_LOG`
pub(crate) fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::InvalidConfiguration(format!("Invalid log level: {e}")))
}

// Each branch builds its own layer because the layer type differs per writer and format.
fn init_subscriber(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = env_filter(config)?;

    if config.json_logs && config.stderr_output {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .json();

        Registry::default()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::TracingError(e.to_string()))
    } else if config.json_logs {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .json();

        Registry::default()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::TracingError(e.to_string()))
    } else if config.stderr_output {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .pretty();

        Registry::default()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::TracingError(e.to_string()))
    } else {
        let fmt_layer = fmt::layer().with_target(true).pretty();

        Registry::default()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::TracingError(e.to_string()))
    }
}

#[cfg(feature = "prometheus")]
fn init_prometheus(
    port: u16,
) -> Result<metrics_exporter_prometheus::PrometheusHandle, TelemetryError> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::net::{Ipv4Addr, SocketAddr};

    let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
        TelemetryError::MetricsError(
            "the Prometheus endpoint must be started inside a tokio runtime".to_string(),
        )
    })?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let (recorder, exporter) = {
        let _entered = runtime.enter();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .build()
            .map_err(|e| TelemetryError::MetricsError(e.to_string()))?
    };

    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsError(e.to_string()))?;
    runtime.spawn(async move {
        if let Err(error) = exporter.await {
            warn!(?error, "Prometheus metrics endpoint stopped");
        }
    });

    fedtrust::telemetry::init_metrics();
    info!(port, "Prometheus metrics endpoint started");
    Ok(handle)
}
