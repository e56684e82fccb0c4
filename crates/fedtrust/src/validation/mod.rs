//! Token validation pipeline
//!
//! A token is checked by an ordered chain of independently replaceable steps:
//!
//! ```text
//! raw token ──► parse ──► signing key ──► algorithm ──► signature
//!                                                          │
//!            ValidatedToken ◄── lifetime ◄── audience ◄── issuer
//! ```
//!
//! Every step is a narrow trait ([`SigningKeyResolver`], [`AlgorithmValidator`],
//! [`SignatureValidator`], [`IssuerValidator`], [`AudienceValidator`],
//! [`LifetimeValidator`]) also implemented for plain closures, so a caller can
//! swap a single check through [`ValidationParameters`] without touching the
//! others. The pipeline stops at the first failing step and returns that
//! step's [`ValidationError`].

mod error;
mod parameters;
mod pipeline;
mod steps;

pub use error::{
    ErrorMap, ErrorVariant, FailureKind, MessageArg, MessageDetail, REDACTED,
    TokenValidationError, ValidationError,
};
pub use parameters::{
    DEFAULT_ALLOWED_ALGORITHMS, DEFAULT_CLOCK_SKEW, ValidationParameters, ValidationSettings,
    ValidationSteps,
};
pub use pipeline::{TokenValidator, ValidatedToken, validate_token};
pub use steps::{
    AllowListAlgorithmValidator, AlgorithmValidator, AudienceValidator, DefaultAudienceValidator,
    DefaultIssuerValidator, DefaultLifetimeValidator, IssuerValidator, JwsSignatureValidator,
    KidKeyResolver, LifetimeValidator, SignatureValidator, SigningKeyResolver,
};

use std::fmt;

/// Outcome of a validation step or of the whole pipeline
pub type ValidationResult<T = ()> = Result<T, ValidationError>;

/// Pipeline stage identity, reported on failures and in telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationStep {
    /// Obtaining trust configuration
    Configuration,
    /// Parsing the raw token
    TokenParsing,
    /// Matching the token to signing keys
    SigningKeyResolution,
    /// Algorithm allow-list check
    Algorithm,
    /// Signature verification
    Signature,
    /// Issuer check
    Issuer,
    /// Audience check
    Audience,
    /// Not-before / expiry check
    Lifetime,
}

impl ValidationStep {
    /// Stable name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::TokenParsing => "token_parsing",
            Self::SigningKeyResolution => "signing_key_resolution",
            Self::Algorithm => "algorithm",
            Self::Signature => "signature",
            Self::Issuer => "issuer",
            Self::Audience => "audience",
            Self::Lifetime => "lifetime",
        }
    }
}

impl fmt::Display for ValidationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
