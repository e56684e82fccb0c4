//! Logging and metrics setup for services built on `fedtrust`
//!
//! Installs a `tracing` subscriber (JSON or pretty, filtered by `RUST_LOG`
//! or the configured level) and, with the `prometheus` feature, a Prometheus
//! scrape endpoint. The returned guard hands out a matching
//! [`fedtrust::telemetry::TelemetrySink`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use fedtrust_telemetry::TelemetryConfig;
//!
//! let guard = TelemetryConfig::builder()
//!     .service_name("orders-api")
//!     .json_logs(true)
//!     .build()
//!     .init()?;
//!
//! let validator = TokenValidator::new(cache).with_telemetry(guard.sink());
//! ```
//!
//! # Feature Flags
//!
//! - `prometheus` - Prometheus exporter backed by fedtrust's `metrics` sink

#![cfg_attr(docsrs, feature(doc_cfg))]

mod config;
mod error;
mod init;
mod sink;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::{TelemetryError, TelemetryResult};
pub use init::TelemetryGuard;
pub use sink::TracingTelemetry;
