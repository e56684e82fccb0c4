//! Validation parameters and step overrides

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::ErrorMap;
use super::steps::{
    AlgorithmValidator, AllowListAlgorithmValidator, AudienceValidator, DefaultAudienceValidator,
    DefaultIssuerValidator, DefaultLifetimeValidator, IssuerValidator, JwsSignatureValidator,
    KidKeyResolver, LifetimeValidator, SignatureValidator, SigningKeyResolver,
};

/// Algorithms accepted when nothing else is configured
pub const DEFAULT_ALLOWED_ALGORITHMS: &[&str] = &[
    "ES256", "ES384", "RS256", "RS384", "RS512", "PS256", "PS384", "PS512",
];

/// Default clock skew tolerance (5 minutes)
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Step implementations used by the pipeline
#[derive(Clone)]
pub struct ValidationSteps {
    /// Signing key resolution
    pub key_resolver: Arc<dyn SigningKeyResolver>,
    /// Algorithm check
    pub algorithm: Arc<dyn AlgorithmValidator>,
    /// Signature verification
    pub signature: Arc<dyn SignatureValidator>,
    /// Issuer check
    pub issuer: Arc<dyn IssuerValidator>,
    /// Audience check
    pub audience: Arc<dyn AudienceValidator>,
    /// Lifetime check
    pub lifetime: Arc<dyn LifetimeValidator>,
}

impl Default for ValidationSteps {
    fn default() -> Self {
        Self {
            key_resolver: Arc::new(KidKeyResolver),
            algorithm: Arc::new(AllowListAlgorithmValidator),
            signature: Arc::new(JwsSignatureValidator),
            issuer: Arc::new(DefaultIssuerValidator),
            audience: Arc::new(DefaultAudienceValidator),
            lifetime: Arc::new(DefaultLifetimeValidator),
        }
    }
}

impl fmt::Debug for ValidationSteps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationSteps").finish_non_exhaustive()
    }
}

/// Everything a validation call is checked against
///
/// ```
/// use fedtrust::validation::ValidationParameters;
///
/// let parameters = ValidationParameters::new()
///     .with_valid_issuers(["https://login.example.com"])
///     .with_valid_audiences(["api://orders"]);
/// assert!(parameters.require_expiration);
/// ```
#[derive(Debug, Clone)]
pub struct ValidationParameters {
    /// Trusted issuers, in addition to the issuer the configuration declares
    pub valid_issuers: Vec<String>,
    /// Accepted audiences
    pub valid_audiences: Vec<String>,
    /// Accepted signing algorithms
    pub allowed_algorithms: Vec<String>,
    /// Tolerance applied to both lifetime bounds
    pub clock_skew: Duration,
    /// Reject tokens without `exp`
    pub require_expiration: bool,
    /// Reject tokens without a signature
    pub require_signed_tokens: bool,
    /// Run the issuer step
    pub validate_issuer: bool,
    /// Run the audience step
    pub validate_audience: bool,
    /// Run the lifetime step
    pub validate_lifetime: bool,
    /// Try every key when the token names none
    pub try_all_keys_without_kid: bool,
    /// Render sensitive message arguments when materializing errors
    pub show_sensitive_detail: bool,
    /// Fixed clock, `None` reads the system clock
    pub current_time: Option<SystemTime>,
    /// Kind to variant table used when materializing errors
    pub error_map: ErrorMap,
    /// Step implementations
    pub steps: ValidationSteps,
}

impl Default for ValidationParameters {
    fn default() -> Self {
        Self {
            valid_issuers: Vec::new(),
            valid_audiences: Vec::new(),
            allowed_algorithms: DEFAULT_ALLOWED_ALGORITHMS
                .iter()
                .map(|alg| (*alg).to_string())
                .collect(),
            clock_skew: DEFAULT_CLOCK_SKEW,
            require_expiration: true,
            require_signed_tokens: true,
            validate_issuer: true,
            validate_audience: true,
            validate_lifetime: true,
            try_all_keys_without_kid: true,
            show_sensitive_detail: false,
            current_time: None,
            error_map: ErrorMap::base(),
            steps: ValidationSteps::default(),
        }
    }
}

impl ValidationParameters {
    /// Default parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time in seconds since the epoch
    pub fn now(&self) -> u64 {
        self.current_time
            .unwrap_or_else(SystemTime::now)
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
    }

    /// Trust these issuers
    pub fn with_valid_issuers<I, S>(mut self, issuers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid_issuers = issuers.into_iter().map(Into::into).collect();
        self
    }

    /// Accept these audiences
    pub fn with_valid_audiences<I, S>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid_audiences = audiences.into_iter().map(Into::into).collect();
        self
    }

    /// Accept these algorithms
    pub fn with_allowed_algorithms<I, S>(mut self, algorithms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_algorithms = algorithms.into_iter().map(Into::into).collect();
        self
    }

    /// Set the clock skew tolerance
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    /// Validate against a fixed clock
    pub fn with_current_time(mut self, now: SystemTime) -> Self {
        self.current_time = Some(now);
        self
    }

    /// Use `error_map` when materializing errors
    pub fn with_error_map(mut self, error_map: ErrorMap) -> Self {
        self.error_map = error_map;
        self
    }

    /// Replace the signing key resolution step
    pub fn with_key_resolver(mut self, step: impl SigningKeyResolver + 'static) -> Self {
        self.steps.key_resolver = Arc::new(step);
        self
    }

    /// Replace the algorithm step
    pub fn with_algorithm_validator(mut self, step: impl AlgorithmValidator + 'static) -> Self {
        self.steps.algorithm = Arc::new(step);
        self
    }

    /// Replace the signature step
    pub fn with_signature_validator(mut self, step: impl SignatureValidator + 'static) -> Self {
        self.steps.signature = Arc::new(step);
        self
    }

    /// Replace the issuer step
    pub fn with_issuer_validator(mut self, step: impl IssuerValidator + 'static) -> Self {
        self.steps.issuer = Arc::new(step);
        self
    }

    /// Replace the audience step
    pub fn with_audience_validator(mut self, step: impl AudienceValidator + 'static) -> Self {
        self.steps.audience = Arc::new(step);
        self
    }

    /// Replace the lifetime step
    pub fn with_lifetime_validator(mut self, step: impl LifetimeValidator + 'static) -> Self {
        self.steps.lifetime = Arc::new(step);
        self
    }
}

/// Deserializable subset of [`ValidationParameters`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// Trusted issuers
    pub valid_issuers: Vec<String>,
    /// Accepted audiences
    pub valid_audiences: Vec<String>,
    /// Accepted algorithms
    pub allowed_algorithms: Vec<String>,
    /// Clock skew tolerance in seconds
    pub clock_skew_secs: u64,
    /// Reject tokens without `exp`
    pub require_expiration: bool,
    /// Reject tokens without a signature
    pub require_signed_tokens: bool,
    /// Render sensitive detail in error messages
    pub show_sensitive_detail: bool,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        let parameters = ValidationParameters::default();
        Self {
            valid_issuers: parameters.valid_issuers,
            valid_audiences: parameters.valid_audiences,
            allowed_algorithms: parameters.allowed_algorithms,
            clock_skew_secs: parameters.clock_skew.as_secs(),
            require_expiration: parameters.require_expiration,
            require_signed_tokens: parameters.require_signed_tokens,
            show_sensitive_detail: parameters.show_sensitive_detail,
        }
    }
}

impl From<ValidationSettings> for ValidationParameters {
    fn from(settings: ValidationSettings) -> Self {
        Self {
            valid_issuers: settings.valid_issuers,
            valid_audiences: settings.valid_audiences,
            allowed_algorithms: settings.allowed_algorithms,
            clock_skew: Duration::from_secs(settings.clock_skew_secs),
            require_expiration: settings.require_expiration,
            require_signed_tokens: settings.require_signed_tokens,
            show_sensitive_detail: settings.show_sensitive_detail,
            ..Self::default()
        }
    }
}
