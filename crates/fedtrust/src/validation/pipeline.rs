//! Pipeline runner and the cache-backed token validator

use std::sync::Arc;

use tracing::{debug, instrument};

use super::{
    FailureKind, TokenValidationError, ValidationError, ValidationParameters, ValidationResult,
    ValidationStep,
};
use crate::cache::ConfigurationProvider;
use crate::metadata::SigningMetadata;
use crate::telemetry::{NoopTelemetry, TelemetrySink, ValidationEvent};
use crate::token::{JwtParser, SecurityToken, TokenClaims, TokenHeader, TokenParser};

/// A token that passed every step
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedToken {
    /// Token claims
    pub claims: TokenClaims,
    /// Token header
    pub header: TokenHeader,
    /// Accepted issuer
    pub issuer: Option<String>,
    /// Identifier of the key that verified the signature
    pub signing_key_id: Option<String>,
    /// Algorithm the signature was verified with
    pub algorithm: Option<String>,
}

impl ValidatedToken {
    /// Subject claim
    pub fn subject(&self) -> Option<&str> {
        self.claims.subject.as_deref()
    }
}

fn at(step: ValidationStep) -> impl FnOnce(ValidationError) -> ValidationError {
    move |error| error.with_step(step)
}

/// Run the validation steps over a parsed token
///
/// Steps run in order: signing key resolution, algorithm, signature, issuer,
/// audience, lifetime. The first failure is returned tagged with its step.
/// Unsigned tokens skip the key, algorithm and signature steps only when
/// [`ValidationParameters::require_signed_tokens`] is off.
///
/// # Errors
///
/// Returns the [`ValidationError`] of the first failing step.
pub fn validate_token<T>(
    token: &SecurityToken,
    configuration: &T,
    parameters: &ValidationParameters,
) -> ValidationResult<ValidatedToken>
where
    T: SigningMetadata + ?Sized,
{
    let steps = &parameters.steps;

    let (signing_key_id, algorithm) = if token.is_signed() {
        let candidates = steps
            .key_resolver
            .resolve(token, configuration.signing_keys(), parameters)
            .map_err(at(ValidationStep::SigningKeyResolution))?;

        let algorithm = token.header.algorithm.as_deref();
        steps
            .algorithm
            .validate(algorithm, &candidates, token, parameters)
            .map_err(at(ValidationStep::Algorithm))?;

        let algorithm = algorithm.unwrap_or_default();
        let key = steps
            .signature
            .validate(token, algorithm, &candidates, parameters)
            .map_err(at(ValidationStep::Signature))?;

        (key.key_id().map(str::to_owned), Some(algorithm.to_owned()))
    } else if parameters.require_signed_tokens {
        return Err(
            ValidationError::new(FailureKind::UnsignedToken, "token is not signed")
                .with_step(ValidationStep::Signature),
        );
    } else {
        (None, None)
    };

    let issuer = if parameters.validate_issuer {
        Some(
            steps
                .issuer
                .validate(
                    token.claims.issuer.as_deref(),
                    token,
                    configuration.issuer(),
                    parameters,
                )
                .map_err(at(ValidationStep::Issuer))?,
        )
    } else {
        token.claims.issuer.clone()
    };

    if parameters.validate_audience {
        steps
            .audience
            .validate(&token.claims.audiences, token, parameters)
            .map_err(at(ValidationStep::Audience))?;
    }

    if parameters.validate_lifetime {
        steps
            .lifetime
            .validate(
                token.claims.not_before,
                token.claims.expires,
                token,
                parameters,
            )
            .map_err(at(ValidationStep::Lifetime))?;
    }

    Ok(ValidatedToken {
        claims: token.claims.clone(),
        header: token.header.clone(),
        issuer,
        signing_key_id,
        algorithm,
    })
}

/// Validates token text against configuration from a provider
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use fedtrust::cache::ConfigurationCache;
/// use fedtrust::source::HttpMetadataSource;
/// use fedtrust::validation::{TokenValidator, ValidationParameters};
///
/// # async fn example(raw_token: &str) -> Result<(), Box<dyn std::error::Error>> {
/// let cache = ConfigurationCache::openid_connect(
///     "https://login.example.com/.well-known/openid-configuration",
///     Arc::new(HttpMetadataSource::new()?),
/// );
/// let validator = TokenValidator::new(Arc::new(cache));
/// let parameters = ValidationParameters::new().with_valid_audiences(["api://orders"]);
///
/// let token = validator.validate_to_error(raw_token, &parameters).await?;
/// println!("subject: {:?}", token.subject());
/// # Ok(())
/// # }
/// ```
pub struct TokenValidator<T> {
    provider: Arc<dyn ConfigurationProvider<T>>,
    parser: Arc<dyn TokenParser>,
    telemetry: Arc<dyn TelemetrySink>,
    refresh_on_key_not_found: bool,
}

impl<T> std::fmt::Debug for TokenValidator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("parser", &self.parser)
            .field("telemetry", &self.telemetry)
            .field("refresh_on_key_not_found", &self.refresh_on_key_not_found)
            .finish_non_exhaustive()
    }
}

impl<T> TokenValidator<T>
where
    T: SigningMetadata + Send + Sync + 'static,
{
    /// Validate JWTs against configuration from `provider`
    pub fn new<P>(provider: Arc<P>) -> Self
    where
        P: ConfigurationProvider<T> + 'static,
    {
        Self::from_provider(provider)
    }

    /// Like [`new`](Self::new) for an already type-erased provider
    pub fn from_provider(provider: Arc<dyn ConfigurationProvider<T>>) -> Self {
        Self {
            provider,
            parser: Arc::new(JwtParser::new()),
            telemetry: Arc::new(NoopTelemetry),
            refresh_on_key_not_found: true,
        }
    }

    /// Parse tokens with `parser`
    pub fn with_parser(mut self, parser: Arc<dyn TokenParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Report outcomes to `telemetry`
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Whether an unknown `kid` asks the provider for fresh keys (default: true)
    pub fn with_refresh_on_key_not_found(mut self, enabled: bool) -> Self {
        self.refresh_on_key_not_found = enabled;
        self
    }

    /// Validate `raw`
    ///
    /// # Errors
    ///
    /// Returns the first failure: configuration unavailable, malformed token,
    /// or the failing validation step.
    #[instrument(skip_all)]
    pub async fn validate(
        &self,
        raw: &str,
        parameters: &ValidationParameters,
    ) -> ValidationResult<ValidatedToken> {
        let result = self.run(raw, parameters).await;

        let event = match &result {
            Ok(_) => ValidationEvent::Success,
            Err(error) => {
                debug!(
                    step = ?error.step(),
                    kind = %error.kind(),
                    "token rejected: {}",
                    error.message()
                );
                ValidationEvent::Failure {
                    step: error.step(),
                    kind: error.kind(),
                    error_type: parameters.error_map.resolve(error),
                    cause_type: error.cause_type(),
                }
            }
        };
        self.telemetry.record_validation(&event);

        result
    }

    /// Validate `raw`, materializing any failure
    ///
    /// # Errors
    ///
    /// Returns the failure built with the parameters' error map and
    /// sensitivity setting.
    pub async fn validate_to_error(
        &self,
        raw: &str,
        parameters: &ValidationParameters,
    ) -> Result<ValidatedToken, TokenValidationError> {
        self.validate(raw, parameters).await.map_err(|error| {
            error.materialize_with(&parameters.error_map, parameters.show_sensitive_detail)
        })
    }

    async fn run(
        &self,
        raw: &str,
        parameters: &ValidationParameters,
    ) -> ValidationResult<ValidatedToken> {
        let configuration = self.provider.configuration().await.map_err(|e| {
            ValidationError::new(
                FailureKind::ConfigurationUnavailable,
                "trust configuration is unavailable ({0}): {1}",
            )
            .safe_arg(e.error_type())
            .safe_arg(e.to_string())
            .with_cause_type(e.error_type())
            .with_step(ValidationStep::Configuration)
        })?;

        let token = self
            .parser
            .parse(raw)
            .map_err(|e| e.with_step(ValidationStep::TokenParsing))?;

        let result = validate_token(&token, configuration.as_ref(), parameters);
        if let Err(error) = &result
            && error.kind() == FailureKind::SigningKeyNotFound
            && self.refresh_on_key_not_found
        {
            debug!("signing key not found, requesting configuration refresh");
            self.provider.request_refresh();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StaticConfiguration;
    use crate::error::{ConfigError, ConfigResult};
    use crate::metadata::OpenIdConfiguration;
    use crate::telemetry::RecordingTelemetry;
    use crate::validation::ErrorVariant;
    use crate::test_support::{hs256_token, mint_hs256, oct_key};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, UNIX_EPOCH};

    const ISSUER: &str = "https://idp.example.com";
    const NOW: u64 = 1_700_000_000;

    fn configuration() -> OpenIdConfiguration {
        OpenIdConfiguration {
            issuer: Some(ISSUER.into()),
            signing_keys: vec![oct_key("k1")],
            ..Default::default()
        }
    }

    fn parameters() -> ValidationParameters {
        ValidationParameters::new()
            .with_allowed_algorithms(["HS256"])
            .with_valid_audiences(["api"])
            .with_current_time(UNIX_EPOCH + Duration::from_secs(NOW))
    }

    fn claims() -> serde_json::Value {
        json!({"iss": ISSUER, "sub": "alice", "aud": "api", "exp": NOW + 600, "nbf": NOW - 10})
    }

    #[test]
    fn test_valid_token_passes_every_step() {
        let token = hs256_token("k1", claims());
        let validated = validate_token(&token, &configuration(), &parameters()).unwrap();

        assert_eq!(validated.subject(), Some("alice"));
        assert_eq!(validated.issuer.as_deref(), Some(ISSUER));
        assert_eq!(validated.signing_key_id.as_deref(), Some("k1"));
        assert_eq!(validated.algorithm.as_deref(), Some("HS256"));
    }

    #[test]
    fn test_failure_carries_step() {
        let mut claims = claims();
        claims["exp"] = json!(NOW - 3_600);
        let token = hs256_token("k1", claims);

        let err = validate_token(&token, &configuration(), &parameters()).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Expired);
        assert_eq!(err.step(), Some(ValidationStep::Lifetime));
    }

    #[test]
    fn test_unsigned_token_handling() {
        let mut token = hs256_token("k1", claims());
        token.signature.clear();

        let err = validate_token(&token, &configuration(), &parameters()).unwrap_err();
        assert_eq!(err.kind(), FailureKind::UnsignedToken);

        let lenient = ValidationParameters {
            require_signed_tokens: false,
            ..parameters()
        };
        let validated = validate_token(&token, &configuration(), &lenient).unwrap();
        assert_eq!(validated.signing_key_id, None);
    }

    #[test]
    fn test_disabled_steps_are_skipped() {
        let token = hs256_token("k1", json!({"sub": "alice"}));
        let params = ValidationParameters {
            validate_issuer: false,
            validate_audience: false,
            validate_lifetime: false,
            ..parameters()
        };
        assert!(validate_token(&token, &configuration(), &params).is_ok());
    }

    #[derive(Debug, Default)]
    struct CountingProvider {
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl ConfigurationProvider<OpenIdConfiguration> for CountingProvider {
        async fn configuration(&self) -> ConfigResult<Arc<OpenIdConfiguration>> {
            Ok(Arc::new(configuration()))
        }

        fn request_refresh(&self) {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_unknown_kid_requests_refresh() {
        let provider = Arc::new(CountingProvider::default());
        let validator = TokenValidator::new(Arc::clone(&provider));

        let raw = mint_hs256("rotated", &claims());
        let err = validator.validate(&raw, &parameters()).await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::SigningKeyNotFound);
        assert_eq!(err.step(), Some(ValidationStep::SigningKeyResolution));
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug)]
    struct UnavailableProvider;

    #[async_trait]
    impl ConfigurationProvider<OpenIdConfiguration> for UnavailableProvider {
        async fn configuration(&self) -> ConfigResult<Arc<OpenIdConfiguration>> {
            Err(ConfigError::fetch(ISSUER, "connection refused"))
        }

        fn request_refresh(&self) {}
    }

    #[tokio::test]
    async fn test_configuration_failure_is_reported_and_recorded() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let validator = TokenValidator::<OpenIdConfiguration>::new(Arc::new(UnavailableProvider))
            .with_telemetry(Arc::clone(&telemetry) as Arc<dyn TelemetrySink>);

        let err = validator
            .validate_to_error("irrelevant", &parameters())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::ConfigurationUnavailable);
        assert_eq!(err.step(), Some(ValidationStep::Configuration));
        assert_eq!(err.cause_type(), Some("fetch_error"));
        assert!(
            err.message()
                .starts_with("trust configuration is unavailable (fetch_error)")
        );

        assert_eq!(
            telemetry.validations(),
            vec![ValidationEvent::Failure {
                step: Some(ValidationStep::Configuration),
                kind: FailureKind::ConfigurationUnavailable,
                error_type: ErrorVariant::ConfigurationUnavailable,
                cause_type: Some("fetch_error"),
            }]
        );
    }

    #[tokio::test]
    async fn test_malformed_token_tagged_with_parsing_step() {
        let validator =
            TokenValidator::<OpenIdConfiguration>::new(Arc::new(StaticConfiguration::new(
                configuration(),
            )));
        let err = validator
            .validate("not-a-token", &parameters())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::MalformedToken);
        assert_eq!(err.step(), Some(ValidationStep::TokenParsing));
    }
}
