//! Log-backed telemetry sink

use fedtrust::telemetry::{RefreshEvent, TelemetrySink, ValidationEvent};
use tracing::{debug, info, warn};

/// Sink that turns cache and pipeline events into log events
///
/// Refresh failures log at `warn`, successful refreshes at `info` and
/// validation outcomes at `debug`, all under the `fedtrust::telemetry` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record_refresh(&self, event: &RefreshEvent) {
        let status = event.status.tag();
        let duration_ms = event.duration.as_millis() as u64;
        if event.status.is_success() {
            info!(
                target: "fedtrust::telemetry",
                address = %event.address,
                library = event.library,
                %status,
                duration_ms,
                "configuration refreshed"
            );
        } else {
            warn!(
                target: "fedtrust::telemetry",
                address = %event.address,
                library = event.library,
                %status,
                duration_ms,
                "configuration refresh failed"
            );
        }
    }

    fn record_validation(&self, event: &ValidationEvent) {
        match event {
            ValidationEvent::Success => {
                debug!(target: "fedtrust::telemetry", status = "success", "token validated");
            }
            ValidationEvent::Failure {
                step,
                kind,
                error_type,
                cause_type,
            } => {
                debug!(
                    target: "fedtrust::telemetry",
                    status = "failure",
                    step = step.map_or("unknown", |s| s.as_str()),
                    kind = kind.as_str(),
                    error_type = error_type.as_str(),
                    cause_type = cause_type.unwrap_or("none"),
                    "token rejected"
                );
            }
        }
    }
}
