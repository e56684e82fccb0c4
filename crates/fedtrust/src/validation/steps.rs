//! Validation steps
//!
//! Each step is a narrow trait with a default implementation. Closures with
//! the matching signature implement the traits too:
//!
//! ```
//! use fedtrust::token::SecurityToken;
//! use fedtrust::validation::{
//!     FailureKind, ValidationError, ValidationParameters, ValidationResult,
//! };
//!
//! let parameters = ValidationParameters::new().with_issuer_validator(
//!     |issuer: Option<&str>,
//!      _token: &SecurityToken,
//!      _configured: Option<&str>,
//!      _parameters: &ValidationParameters|
//!      -> ValidationResult<String> {
//!         match issuer {
//!             Some(iss) if iss.ends_with(".example.com") => Ok(iss.to_string()),
//!             _ => Err(ValidationError::new(FailureKind::IssuerMismatch, "untrusted issuer")),
//!         }
//!     },
//! );
//! # let _ = parameters;
//! ```

use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::Algorithm;

use super::{FailureKind, ValidationError, ValidationParameters, ValidationResult};
use crate::metadata::SigningKey;
use crate::token::SecurityToken;

/// Selects the candidate keys for a token
pub trait SigningKeyResolver: Send + Sync {
    /// Keys the signature may be checked against
    ///
    /// # Errors
    ///
    /// Fails when no key, or more than one key, matches.
    fn resolve(
        &self,
        token: &SecurityToken,
        keys: &[SigningKey],
        parameters: &ValidationParameters,
    ) -> ValidationResult<Vec<SigningKey>>;
}

/// Checks the signing algorithm
pub trait AlgorithmValidator: Send + Sync {
    /// Accept or reject `algorithm` for the candidate keys
    ///
    /// # Errors
    ///
    /// Fails when the algorithm is absent or not allowed.
    fn validate(
        &self,
        algorithm: Option<&str>,
        keys: &[SigningKey],
        token: &SecurityToken,
        parameters: &ValidationParameters,
    ) -> ValidationResult;
}

/// Verifies the token signature
pub trait SignatureValidator: Send + Sync {
    /// Verify against the candidate keys, returning the key that matched
    ///
    /// # Errors
    ///
    /// Fails when no candidate key verifies the signature.
    fn validate(
        &self,
        token: &SecurityToken,
        algorithm: &str,
        keys: &[SigningKey],
        parameters: &ValidationParameters,
    ) -> ValidationResult<SigningKey>;
}

/// Checks the issuer
pub trait IssuerValidator: Send + Sync {
    /// Accept or reject `issuer`, returning the accepted issuer
    ///
    /// # Errors
    ///
    /// Fails when the issuer is absent or untrusted.
    fn validate(
        &self,
        issuer: Option<&str>,
        token: &SecurityToken,
        configured_issuer: Option<&str>,
        parameters: &ValidationParameters,
    ) -> ValidationResult<String>;
}

/// Checks the audience
pub trait AudienceValidator: Send + Sync {
    /// Accept or reject the token's audiences
    ///
    /// # Errors
    ///
    /// Fails when no audience is accepted.
    fn validate(
        &self,
        audiences: &[String],
        token: &SecurityToken,
        parameters: &ValidationParameters,
    ) -> ValidationResult;
}

/// Checks not-before and expiry
pub trait LifetimeValidator: Send + Sync {
    /// Accept or reject the lifetime bounds, in seconds since the epoch
    ///
    /// # Errors
    ///
    /// Fails when the current time is outside the bounds.
    fn validate(
        &self,
        not_before: Option<u64>,
        expires: Option<u64>,
        token: &SecurityToken,
        parameters: &ValidationParameters,
    ) -> ValidationResult;
}

impl<F> SigningKeyResolver for F
where
    F: Fn(&SecurityToken, &[SigningKey], &ValidationParameters) -> ValidationResult<Vec<SigningKey>>
        + Send
        + Sync,
{
    fn resolve(
        &self,
        token: &SecurityToken,
        keys: &[SigningKey],
        parameters: &ValidationParameters,
    ) -> ValidationResult<Vec<SigningKey>> {
        self(token, keys, parameters)
    }
}

impl<F> AlgorithmValidator for F
where
    F: Fn(Option<&str>, &[SigningKey], &SecurityToken, &ValidationParameters) -> ValidationResult
        + Send
        + Sync,
{
    fn validate(
        &self,
        algorithm: Option<&str>,
        keys: &[SigningKey],
        token: &SecurityToken,
        parameters: &ValidationParameters,
    ) -> ValidationResult {
        self(algorithm, keys, token, parameters)
    }
}

impl<F> SignatureValidator for F
where
    F: Fn(&SecurityToken, &str, &[SigningKey], &ValidationParameters) -> ValidationResult<SigningKey>
        + Send
        + Sync,
{
    fn validate(
        &self,
        token: &SecurityToken,
        algorithm: &str,
        keys: &[SigningKey],
        parameters: &ValidationParameters,
    ) -> ValidationResult<SigningKey> {
        self(token, algorithm, keys, parameters)
    }
}

impl<F> IssuerValidator for F
where
    F: Fn(Option<&str>, &SecurityToken, Option<&str>, &ValidationParameters) -> ValidationResult<String>
        + Send
        + Sync,
{
    fn validate(
        &self,
        issuer: Option<&str>,
        token: &SecurityToken,
        configured_issuer: Option<&str>,
        parameters: &ValidationParameters,
    ) -> ValidationResult<String> {
        self(issuer, token, configured_issuer, parameters)
    }
}

impl<F> AudienceValidator for F
where
    F: Fn(&[String], &SecurityToken, &ValidationParameters) -> ValidationResult + Send + Sync,
{
    fn validate(
        &self,
        audiences: &[String],
        token: &SecurityToken,
        parameters: &ValidationParameters,
    ) -> ValidationResult {
        self(audiences, token, parameters)
    }
}

impl<F> LifetimeValidator for F
where
    F: Fn(Option<u64>, Option<u64>, &SecurityToken, &ValidationParameters) -> ValidationResult
        + Send
        + Sync,
{
    fn validate(
        &self,
        not_before: Option<u64>,
        expires: Option<u64>,
        token: &SecurityToken,
        parameters: &ValidationParameters,
    ) -> ValidationResult {
        self(not_before, expires, token, parameters)
    }
}

/// Matches the `kid` header against the key set
///
/// Without a `kid` every key is a candidate when
/// [`ValidationParameters::try_all_keys_without_kid`] is set. Several keys
/// sharing a `kid` are narrowed down by their declared algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct KidKeyResolver;

impl SigningKeyResolver for KidKeyResolver {
    fn resolve(
        &self,
        token: &SecurityToken,
        keys: &[SigningKey],
        parameters: &ValidationParameters,
    ) -> ValidationResult<Vec<SigningKey>> {
        if keys.is_empty() {
            return Err(ValidationError::new(
                FailureKind::NoSigningKeys,
                "configuration holds no signing keys",
            ));
        }

        let Some(kid) = token.header.key_id.as_deref() else {
            if parameters.try_all_keys_without_kid {
                return Ok(keys.to_vec());
            }
            return Err(ValidationError::new(
                FailureKind::SigningKeyNotFound,
                "token names no key identifier",
            ));
        };

        let mut matches: Vec<SigningKey> = keys
            .iter()
            .filter(|key| key.key_id() == Some(kid))
            .cloned()
            .collect();

        if matches.len() > 1
            && let Some(alg) = token.header.algorithm.as_deref()
        {
            matches.retain(|key| key.algorithm().is_none_or(|declared| declared == alg));
        }

        match matches.len() {
            0 => Err(ValidationError::new(
                FailureKind::SigningKeyNotFound,
                "no signing key matches kid '{0}' among {1} key(s)",
            )
            .safe_arg(kid.to_string())
            .safe_arg(keys.len().to_string())),
            1 => Ok(matches),
            n => Err(ValidationError::new(
                FailureKind::AmbiguousSigningKey,
                "{0} signing keys match kid '{1}'",
            )
            .safe_arg(n.to_string())
            .safe_arg(kid.to_string())),
        }
    }
}

/// Accepts algorithms on [`ValidationParameters::allowed_algorithms`]
///
/// `none` is always rejected. When every candidate key declares an algorithm
/// and none declares the token's, the token is rejected as well.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowListAlgorithmValidator;

impl AlgorithmValidator for AllowListAlgorithmValidator {
    fn validate(
        &self,
        algorithm: Option<&str>,
        keys: &[SigningKey],
        _token: &SecurityToken,
        parameters: &ValidationParameters,
    ) -> ValidationResult {
        let Some(algorithm) = algorithm.filter(|alg| !alg.is_empty()) else {
            return Err(ValidationError::new(
                FailureKind::MissingAlgorithm,
                "token header has no algorithm",
            ));
        };

        if algorithm.eq_ignore_ascii_case("none")
            || !parameters.allowed_algorithms.iter().any(|a| a == algorithm)
        {
            return Err(ValidationError::new(
                FailureKind::AlgorithmNotAllowed,
                "algorithm '{0}' is not allowed",
            )
            .safe_arg(algorithm.to_string()));
        }

        let declared: Vec<&str> = keys.iter().filter_map(SigningKey::algorithm).collect();
        if !keys.is_empty() && declared.len() == keys.len() && !declared.contains(&algorithm) {
            return Err(ValidationError::new(
                FailureKind::AlgorithmKeyMismatch,
                "algorithm '{0}' does not match the key algorithm(s) {1}",
            )
            .safe_arg(algorithm.to_string())
            .safe_arg(declared.join(", ")));
        }

        Ok(())
    }
}

/// Verifies JWS signatures with `jsonwebtoken`
///
/// Candidate keys are tried in order. Crypto provider failures are kept as
/// the inner error of the final mismatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct JwsSignatureValidator;

impl SignatureValidator for JwsSignatureValidator {
    fn validate(
        &self,
        token: &SecurityToken,
        algorithm: &str,
        keys: &[SigningKey],
        _parameters: &ValidationParameters,
    ) -> ValidationResult<SigningKey> {
        let parsed = Algorithm::from_str(algorithm).map_err(|_| {
            ValidationError::new(
                FailureKind::SignatureVerificationFailed,
                "algorithm '{0}' is not supported for signature verification",
            )
            .safe_arg(algorithm.to_string())
        })?;

        let signature = URL_SAFE_NO_PAD.encode(&token.signature);
        let mut last_failure = None;
        let mut tried = 0usize;

        for key in keys {
            if key.algorithm().is_some_and(|declared| declared != algorithm) {
                continue;
            }
            tried += 1;

            let decoding_key = match key.decoding_key() {
                Ok(decoding_key) => decoding_key,
                Err(reason) => {
                    last_failure = Some(
                        ValidationError::new(
                            FailureKind::SignatureVerificationFailed,
                            "key '{0}' cannot be used for verification: {1}",
                        )
                        .safe_arg(key.key_id().unwrap_or("<none>").to_string())
                        .safe_arg(reason.to_string()),
                    );
                    continue;
                }
            };

            match jsonwebtoken::crypto::verify(&signature, &token.signed_payload, decoding_key, parsed)
            {
                Ok(true) => return Ok(key.clone()),
                Ok(false) => {}
                Err(e) => {
                    last_failure = Some(
                        ValidationError::new(
                            FailureKind::SignatureVerificationFailed,
                            "verification with key '{0}' failed: {1}",
                        )
                        .safe_arg(key.key_id().unwrap_or("<none>").to_string())
                        .safe_arg(e.to_string()),
                    );
                }
            }
        }

        let error = ValidationError::new(
            FailureKind::SignatureMismatch,
            "signature did not verify against {0} candidate key(s)",
        )
        .safe_arg(tried.to_string());

        Err(match last_failure {
            Some(inner) => error.with_inner(inner),
            None => error,
        })
    }
}

/// Accepts issuers listed in the parameters or declared by the configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultIssuerValidator;

impl IssuerValidator for DefaultIssuerValidator {
    fn validate(
        &self,
        issuer: Option<&str>,
        _token: &SecurityToken,
        configured_issuer: Option<&str>,
        parameters: &ValidationParameters,
    ) -> ValidationResult<String> {
        let Some(issuer) = issuer.filter(|iss| !iss.is_empty()) else {
            return Err(ValidationError::new(
                FailureKind::MissingIssuer,
                "token has no issuer",
            ));
        };

        let mut trusted = parameters
            .valid_issuers
            .iter()
            .map(String::as_str)
            .chain(configured_issuer)
            .peekable();

        if trusted.peek().is_none() {
            return Err(ValidationError::new(
                FailureKind::IssuerMismatch,
                "no trusted issuers are configured",
            ));
        }
        if trusted.any(|candidate| candidate == issuer) {
            return Ok(issuer.to_string());
        }

        Err(
            ValidationError::new(FailureKind::IssuerMismatch, "issuer '{0}' is not trusted")
                .sensitive_arg(issuer.to_string()),
        )
    }
}

/// Accepts tokens with at least one audience in
/// [`ValidationParameters::valid_audiences`]
///
/// A trailing `/` is ignored on both sides.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAudienceValidator;

fn same_audience(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

impl AudienceValidator for DefaultAudienceValidator {
    fn validate(
        &self,
        audiences: &[String],
        _token: &SecurityToken,
        parameters: &ValidationParameters,
    ) -> ValidationResult {
        if parameters.valid_audiences.is_empty() {
            return Err(ValidationError::new(
                FailureKind::AudienceMismatch,
                "no valid audiences are configured",
            ));
        }
        if audiences.is_empty() {
            return Err(ValidationError::new(
                FailureKind::MissingAudience,
                "token has no audience",
            ));
        }

        let accepted = audiences.iter().any(|aud| {
            parameters
                .valid_audiences
                .iter()
                .any(|valid| same_audience(aud, valid))
        });
        if accepted {
            return Ok(());
        }

        Err(ValidationError::new(
            FailureKind::AudienceMismatch,
            "audience(s) '{0}' not among {1} valid audience(s)",
        )
        .sensitive_arg(audiences.join(", "))
        .safe_arg(parameters.valid_audiences.len().to_string()))
    }
}

/// Checks `nbf`/`exp` against the clock with symmetric skew
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLifetimeValidator;

impl LifetimeValidator for DefaultLifetimeValidator {
    fn validate(
        &self,
        not_before: Option<u64>,
        expires: Option<u64>,
        _token: &SecurityToken,
        parameters: &ValidationParameters,
    ) -> ValidationResult {
        if expires.is_none() && parameters.require_expiration {
            return Err(ValidationError::new(
                FailureKind::NoExpiration,
                "token has no expiration",
            ));
        }

        if let (Some(nbf), Some(exp)) = (not_before, expires)
            && nbf > exp
        {
            return Err(ValidationError::new(
                FailureKind::InvalidLifetime,
                "not-before {0} is later than expiration {1}",
            )
            .safe_arg(nbf.to_string())
            .safe_arg(exp.to_string()));
        }

        let now = parameters.now();
        let skew = parameters.clock_skew.as_secs();

        if let Some(nbf) = not_before
            && nbf > now.saturating_add(skew)
        {
            return Err(ValidationError::new(
                FailureKind::NotYetValid,
                "token is not valid before {0}, current time {1}",
            )
            .safe_arg(nbf.to_string())
            .safe_arg(now.to_string()));
        }

        if let Some(exp) = expires
            && exp.saturating_add(skew) < now
        {
            return Err(ValidationError::new(
                FailureKind::Expired,
                "token expired at {0}, current time {1}",
            )
            .safe_arg(exp.to_string())
            .safe_arg(now.to_string()));
        }

        Ok(())
    }
}
