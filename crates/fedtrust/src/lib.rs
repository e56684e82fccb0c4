//! # Fedtrust - Federated Token Validation
//!
//! Trust-metadata caching and an overridable validation pipeline for tokens
//! issued by federated identity providers.
//!
//! ## Key Features
//!
//! - **Configuration cache** - Single-flight refresh, stale-but-available on
//!   failure, minimum refresh floor, bounded exponential backoff, timeouts and
//!   cancellation
//! - **Pluggable sources** - HTTP, local file and in-memory metadata sources
//! - **OpenID Connect** - Discovery document plus JWKS retrieval
//! - **Validation pipeline** - Key resolution, algorithm, signature, issuer,
//!   audience and lifetime steps, each replaceable on its own
//! - **Deferred errors** - Failures are plain data until materialized into a
//!   [`std::error::Error`] with a cause chain and a per-protocol error map
//!
//! ## Architecture
//!
//! - [`source`] - `MetadataSource` implementations
//! - [`metadata`] - Configuration model, parsers, validators and retrievers
//! - [`cache`] - `ConfigurationCache` and its refresh policy
//! - [`token`] - Parsed token model and the JWS compact parser
//! - [`validation`] - Pipeline steps, parameters and the error model
//! - [`telemetry`] - Telemetry sink contract
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fedtrust::prelude::*;
//!
//! # async fn example(raw_token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let cache = Arc::new(ConfigurationCache::openid_connect(
//!     "https://login.example.com/.well-known/openid-configuration",
//!     Arc::new(HttpMetadataSource::new()?),
//! ));
//!
//! let validator = TokenValidator::new(cache);
//! let parameters = ValidationParameters::new().with_valid_audiences(["api://orders"]);
//!
//! match validator.validate(raw_token, &parameters).await {
//!     Ok(token) => println!("accepted {:?}", token.subject()),
//!     Err(failure) => println!("rejected at {:?}: {}", failure.step(), failure),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `metrics` - `MetricsTelemetry` sink emitting through the `metrics` facade

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub mod cache;
pub mod error;
pub mod metadata;
pub mod source;
pub mod telemetry;
pub mod token;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use cache::{ConfigurationCache, ConfigurationProvider, RefreshPolicy, StaticConfiguration};
pub use error::{ConfigError, ConfigResult, PolicyError};
pub use validation::{
    TokenValidationError, TokenValidator, ValidatedToken, ValidationError, ValidationParameters,
    ValidationResult,
};

/// Commonly used types
pub mod prelude {
    pub use crate::cache::{
        CacheStatus, ConfigurationCache, ConfigurationProvider, RefreshPolicy,
        StaticConfiguration,
    };
    pub use crate::error::{ConfigError, ConfigResult};
    pub use crate::metadata::{
        OpenIdConfiguration, SigningKey, SigningKeyCountValidator, SigningMetadata,
    };
    pub use crate::source::{
        FileMetadataSource, HttpMetadataSource, MetadataSource, StaticMetadataSource,
    };
    pub use crate::telemetry::{NoopTelemetry, TelemetrySink};
    pub use crate::token::{JwtParser, SecurityToken, TokenParser};
    pub use crate::validation::{
        ErrorMap, FailureKind, TokenValidationError, TokenValidator, ValidatedToken,
        ValidationError, ValidationParameters, ValidationResult, ValidationStep,
    };
}
