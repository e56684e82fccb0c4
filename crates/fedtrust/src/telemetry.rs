//! Telemetry contract for the cache and the validation pipeline
//!
//! Both components report outcomes to an injected [`TelemetrySink`]. Sinks are
//! fire-and-forget: methods return nothing and a sink must never influence the
//! outcome of a refresh or a validation.
//!
//! ## Sinks
//!
//! - [`NoopTelemetry`] - discards everything (the default)
//! - [`RecordingTelemetry`] - keeps events in memory for assertions
//! - `MetricsTelemetry` - emits through the `metrics` facade (`metrics` feature)
//!
//! ## Metrics Provided
//!
//! - `fedtrust_configuration_refresh_total` - refresh attempts (labels: address, library, status)
//! - `fedtrust_configuration_refresh_duration_seconds` - refresh duration histogram
//! - `fedtrust_token_validations_total` - validations (labels: status, step, error_type)

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;

use crate::validation::{ErrorVariant, FailureKind, ValidationStep};

/// Library identifier attached to every refresh event
pub const LIBRARY_ID: &str = concat!("fedtrust/", env!("CARGO_PKG_VERSION"));

/// Why a refresh was attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshReason {
    /// No configuration was cached yet
    FirstRefresh,
    /// The cached configuration aged past the automatic refresh interval
    Automatic,
    /// A caller asked for a refresh
    Manual,
}

impl RefreshReason {
    /// Status tag used for successful refreshes
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FirstRefresh => "first-refresh",
            Self::Automatic => "automatic",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one refresh attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshStatus {
    /// New configuration committed
    Succeeded(RefreshReason),
    /// Attempt failed, `error_type` is [`ConfigError::error_type`](crate::ConfigError::error_type)
    Failed {
        /// Why the attempt was made
        reason: RefreshReason,
        /// Error class tag
        error_type: &'static str,
    },
}

impl RefreshStatus {
    /// Status dimension: the reason on success, `failure:<error_type>` otherwise
    pub fn tag(&self) -> String {
        match self {
            Self::Succeeded(reason) => reason.as_str().to_string(),
            Self::Failed { error_type, .. } => format!("failure:{error_type}"),
        }
    }

    /// Whether the attempt succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// A refresh attempt made by a configuration cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshEvent {
    /// Metadata address
    pub address: String,
    /// Library and version identifier
    pub library: &'static str,
    /// Outcome
    pub status: RefreshStatus,
    /// Wall time spent on the attempt
    pub duration: Duration,
}

/// A completed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationEvent {
    /// The token was accepted
    Success,
    /// The token was rejected
    Failure {
        /// Step that rejected it, when known
        step: Option<ValidationStep>,
        /// Failure kind
        kind: FailureKind,
        /// Variant the failure materializes into
        error_type: ErrorVariant,
        /// Class of the underlying cause, such as the configuration error type
        cause_type: Option<&'static str>,
    },
}

/// Destination for cache and pipeline telemetry
pub trait TelemetrySink: Send + Sync + fmt::Debug {
    /// Called once per refresh attempt, successful or not
    fn record_refresh(&self, event: &RefreshEvent);

    /// Called once per validation call
    fn record_validation(&self, event: &ValidationEvent);
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record_refresh(&self, _event: &RefreshEvent) {}

    fn record_validation(&self, _event: &ValidationEvent) {}
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    refreshes: Mutex<Vec<RefreshEvent>>,
    validations: Mutex<Vec<ValidationEvent>>,
}

impl RecordingTelemetry {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh events recorded so far
    pub fn refreshes(&self) -> Vec<RefreshEvent> {
        self.refreshes.lock().clone()
    }

    /// Status tags of the recorded refresh events, in order
    pub fn refresh_tags(&self) -> Vec<String> {
        self.refreshes.lock().iter().map(|e| e.status.tag()).collect()
    }

    /// Validation events recorded so far
    pub fn validations(&self) -> Vec<ValidationEvent> {
        self.validations.lock().clone()
    }

    /// Forget everything recorded
    pub fn clear(&self) {
        self.refreshes.lock().clear();
        self.validations.lock().clear();
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record_refresh(&self, event: &RefreshEvent) {
        self.refreshes.lock().push(event.clone());
    }

    fn record_validation(&self, event: &ValidationEvent) {
        self.validations.lock().push(event.clone());
    }
}

#[cfg(feature = "metrics")]
pub use self::metrics_sink::{MetricsTelemetry, init_metrics};

#[cfg(feature = "metrics")]
mod metrics_sink {
    use std::sync::Once;

    use metrics::{counter, describe_counter, describe_histogram, histogram};

    use super::{RefreshEvent, TelemetrySink, ValidationEvent};

    static INIT: Once = Once::new();

    /// Register metric descriptions
    ///
    /// Idempotent, only the first call registers anything.
    pub fn init_metrics() {
        INIT.call_once(|| {
            describe_counter!(
                "fedtrust_configuration_refresh_total",
                "Configuration refresh attempts by outcome"
            );
            describe_histogram!(
                "fedtrust_configuration_refresh_duration_seconds",
                "Configuration refresh duration in seconds"
            );
            describe_counter!(
                "fedtrust_token_validations_total",
                "Token validations by outcome and failing step"
            );
        });
    }

    /// Sink that forwards to the installed `metrics` recorder
    #[derive(Debug, Clone, Copy, Default)]
    pub struct MetricsTelemetry;

    impl MetricsTelemetry {
        /// Create the sink and register metric descriptions
        pub fn new() -> Self {
            init_metrics();
            Self
        }
    }

    impl TelemetrySink for MetricsTelemetry {
        fn record_refresh(&self, event: &RefreshEvent) {
            counter!(
                "fedtrust_configuration_refresh_total",
                "address" => event.address.clone(),
                "library" => event.library,
                "status" => event.status.tag()
            )
            .increment(1);
            histogram!("fedtrust_configuration_refresh_duration_seconds")
                .record(event.duration.as_secs_f64());
        }

        fn record_validation(&self, event: &ValidationEvent) {
            match event {
                ValidationEvent::Success => {
                    counter!(
                        "fedtrust_token_validations_total",
                        "status" => "success",
                        "step" => "none",
                        "error_type" => "none",
                        "cause_type" => "none"
                    )
                    .increment(1);
                }
                ValidationEvent::Failure {
                    step,
                    error_type,
                    cause_type,
                    ..
                } => {
                    counter!(
                        "fedtrust_token_validations_total",
                        "status" => "failure",
                        "step" => step.map_or("unknown", |s| s.as_str()),
                        "error_type" => error_type.as_str(),
                        "cause_type" => cause_type.unwrap_or("none")
                    )
                    .increment(1);
                }
            }
        }
    }
}
