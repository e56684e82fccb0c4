//! Deferred validation failures
//!
//! Validation steps report failures as [`ValidationError`] values: plain data
//! holding the failure kind, an unformatted message template with its
//! arguments, the error variant that would represent the failure, the call
//! site that produced it and an optional inner cause. Nothing is formatted
//! until a caller asks for a real error with [`ValidationError::materialize`],
//! which produces a [`TokenValidationError`] implementing
//! [`std::error::Error`] with a `source()` chain mirroring the inner causes.
//!
//! The mapping from [`FailureKind`] to [`ErrorVariant`] is table driven.
//! [`ErrorMap::base`] keeps the default variant recorded on each error,
//! [`ErrorMap::saml`] overrides the SAML specific kinds, and callers can
//! register their own overrides with [`ErrorMap::with`].

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::panic::Location;

use super::ValidationStep;

/// Placeholder rendered in place of sensitive message arguments
pub const REDACTED: &str = "[REDACTED]";

/// What went wrong during validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FailureKind {
    /// Token text could not be parsed
    MalformedToken,
    /// No trust configuration could be obtained
    ConfigurationUnavailable,
    /// Configuration holds no signing keys at all
    NoSigningKeys,
    /// No key matches the token's key identifier
    SigningKeyNotFound,
    /// More than one key matches the token's key identifier
    AmbiguousSigningKey,
    /// Token header carries no algorithm
    MissingAlgorithm,
    /// Algorithm is not on the allow-list
    AlgorithmNotAllowed,
    /// Algorithm conflicts with the algorithm declared by every candidate key
    AlgorithmKeyMismatch,
    /// Token carries no signature although one is required
    UnsignedToken,
    /// Signature did not verify against any candidate key
    SignatureMismatch,
    /// The crypto provider failed before producing a verdict
    SignatureVerificationFailed,
    /// Token carries no issuer
    MissingIssuer,
    /// Issuer is not trusted
    IssuerMismatch,
    /// Token carries no audience
    MissingAudience,
    /// No audience is accepted
    AudienceMismatch,
    /// Token is not valid yet
    NotYetValid,
    /// Token has expired
    Expired,
    /// Token has no expiration although one is required
    NoExpiration,
    /// Not-before is later than expiration
    InvalidLifetime,
    /// SAML assertion `Conditions` element rejected
    SamlAssertionConditions,
    /// SAML subject confirmation rejected
    SamlSubjectConfirmation,
    /// Failure raised by a caller supplied validator
    Custom,
}

impl FailureKind {
    /// Default error variant representing this kind
    pub fn default_variant(self) -> ErrorVariant {
        match self {
            Self::MalformedToken => ErrorVariant::MalformedToken,
            Self::ConfigurationUnavailable => ErrorVariant::ConfigurationUnavailable,
            Self::NoSigningKeys | Self::SigningKeyNotFound | Self::AmbiguousSigningKey => {
                ErrorVariant::SignatureKeyNotFound
            }
            Self::MissingAlgorithm | Self::AlgorithmNotAllowed | Self::AlgorithmKeyMismatch => {
                ErrorVariant::InvalidAlgorithm
            }
            Self::UnsignedToken | Self::SignatureMismatch | Self::SignatureVerificationFailed => {
                ErrorVariant::InvalidSignature
            }
            Self::MissingIssuer | Self::IssuerMismatch => ErrorVariant::InvalidIssuer,
            Self::MissingAudience | Self::AudienceMismatch => ErrorVariant::InvalidAudience,
            Self::NotYetValid => ErrorVariant::NotYetValid,
            Self::Expired => ErrorVariant::Expired,
            Self::NoExpiration => ErrorVariant::NoExpiration,
            Self::InvalidLifetime => ErrorVariant::InvalidLifetime,
            Self::SamlAssertionConditions | Self::SamlSubjectConfirmation | Self::Custom => {
                ErrorVariant::SecurityToken
            }
        }
    }

    /// Stable snake_case name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedToken => "malformed_token",
            Self::ConfigurationUnavailable => "configuration_unavailable",
            Self::NoSigningKeys => "no_signing_keys",
            Self::SigningKeyNotFound => "signing_key_not_found",
            Self::AmbiguousSigningKey => "ambiguous_signing_key",
            Self::MissingAlgorithm => "missing_algorithm",
            Self::AlgorithmNotAllowed => "algorithm_not_allowed",
            Self::AlgorithmKeyMismatch => "algorithm_key_mismatch",
            Self::UnsignedToken => "unsigned_token",
            Self::SignatureMismatch => "signature_mismatch",
            Self::SignatureVerificationFailed => "signature_verification_failed",
            Self::MissingIssuer => "missing_issuer",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::MissingAudience => "missing_audience",
            Self::AudienceMismatch => "audience_mismatch",
            Self::NotYetValid => "not_yet_valid",
            Self::Expired => "expired",
            Self::NoExpiration => "no_expiration",
            Self::InvalidLifetime => "invalid_lifetime",
            Self::SamlAssertionConditions => "saml_assertion_conditions",
            Self::SamlSubjectConfirmation => "saml_subject_confirmation",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete error variant a failure materializes into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorVariant {
    /// Generic security token failure
    SecurityToken,
    /// Malformed token
    MalformedToken,
    /// Trust configuration unavailable
    ConfigurationUnavailable,
    /// Signing key could not be resolved
    SignatureKeyNotFound,
    /// Algorithm rejected
    InvalidAlgorithm,
    /// Signature rejected
    InvalidSignature,
    /// Issuer rejected
    InvalidIssuer,
    /// Audience rejected
    InvalidAudience,
    /// Token not valid yet
    NotYetValid,
    /// Token expired
    Expired,
    /// Expiration missing
    NoExpiration,
    /// Lifetime bounds inconsistent
    InvalidLifetime,
    /// Generic SAML token failure
    SamlSecurityToken,
    /// SAML audience restriction failure
    SamlAudienceRestriction,
}

impl ErrorVariant {
    /// Stable name, used as the `error_type` telemetry dimension
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SecurityToken => "SecurityTokenError",
            Self::MalformedToken => "MalformedTokenError",
            Self::ConfigurationUnavailable => "ConfigurationUnavailableError",
            Self::SignatureKeyNotFound => "SignatureKeyNotFoundError",
            Self::InvalidAlgorithm => "InvalidAlgorithmError",
            Self::InvalidSignature => "InvalidSignatureError",
            Self::InvalidIssuer => "InvalidIssuerError",
            Self::InvalidAudience => "InvalidAudienceError",
            Self::NotYetValid => "NotYetValidError",
            Self::Expired => "ExpiredError",
            Self::NoExpiration => "NoExpirationError",
            Self::InvalidLifetime => "InvalidLifetimeError",
            Self::SamlSecurityToken => "SamlSecurityTokenError",
            Self::SamlAudienceRestriction => "SamlAudienceRestrictionError",
        }
    }
}

impl fmt::Display for ErrorVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind to variant table applied when materializing
///
/// Kinds without an override keep the variant recorded on the error itself,
/// which defaults to [`FailureKind::default_variant`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorMap {
    overrides: HashMap<FailureKind, ErrorVariant>,
}

impl ErrorMap {
    /// Base table: no overrides
    pub fn base() -> Self {
        Self::default()
    }

    /// SAML table: SAML kinds and audience failures map to SAML variants
    pub fn saml() -> Self {
        Self::base()
            .with(
                FailureKind::SamlAssertionConditions,
                ErrorVariant::SamlSecurityToken,
            )
            .with(
                FailureKind::SamlSubjectConfirmation,
                ErrorVariant::SamlSecurityToken,
            )
            .with(
                FailureKind::AudienceMismatch,
                ErrorVariant::SamlAudienceRestriction,
            )
            .with(
                FailureKind::MissingAudience,
                ErrorVariant::SamlAudienceRestriction,
            )
    }

    /// Add or replace the variant for one kind
    pub fn with(mut self, kind: FailureKind, variant: ErrorVariant) -> Self {
        self.overrides.insert(kind, variant);
        self
    }

    /// Variant an error materializes into under this table
    pub fn resolve(&self, error: &ValidationError) -> ErrorVariant {
        self.overrides
            .get(&error.kind)
            .copied()
            .unwrap_or(error.error_type)
    }
}

/// One message argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageArg {
    value: Cow<'static, str>,
    sensitive: bool,
}

impl MessageArg {
    /// Argument that is always rendered
    pub fn safe(value: impl Into<Cow<'static, str>>) -> Self {
        Self {
            value: value.into(),
            sensitive: false,
        }
    }

    /// Argument rendered only when sensitive detail is requested
    pub fn sensitive(value: impl Into<Cow<'static, str>>) -> Self {
        Self {
            value: value.into(),
            sensitive: true,
        }
    }

    /// Raw value
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether the value is withheld by default
    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }
}

/// Message template with positional `{0}`, `{1}`... placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDetail {
    template: &'static str,
    args: Vec<MessageArg>,
}

impl MessageDetail {
    /// Template without arguments
    pub fn new(template: &'static str) -> Self {
        Self {
            template,
            args: Vec::new(),
        }
    }

    /// Unformatted template
    pub fn template(&self) -> &'static str {
        self.template
    }

    /// Arguments in placeholder order
    pub fn args(&self) -> &[MessageArg] {
        &self.args
    }

    /// Render the template
    ///
    /// Placeholders without a matching argument are kept verbatim, `{{` and
    /// `}}` render as literal braces.
    pub fn format(&self, show_sensitive: bool) -> String {
        let mut out = String::with_capacity(self.template.len() + 16 * self.args.len());
        let mut chars = self.template.char_indices().peekable();

        while let Some((start, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    out.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let rest = &self.template[start + 1..];
                    let index = rest
                        .find('}')
                        .and_then(|end| rest[..end].parse::<usize>().ok().map(|i| (i, end)));
                    match index.and_then(|(i, end)| self.args.get(i).map(|arg| (arg, end))) {
                        Some((arg, end)) => {
                            if arg.sensitive && !show_sensitive {
                                out.push_str(REDACTED);
                            } else {
                                out.push_str(&arg.value);
                            }
                            // skip the digits and the closing brace
                            for _ in 0..=end {
                                chars.next();
                            }
                        }
                        None => out.push('{'),
                    }
                }
                other => out.push(other),
            }
        }
        out
    }
}

/// A validation failure that has not been turned into an error object yet
#[derive(Debug, Clone)]
pub struct ValidationError {
    kind: FailureKind,
    detail: MessageDetail,
    error_type: ErrorVariant,
    origin: &'static Location<'static>,
    step: Option<ValidationStep>,
    cause_type: Option<&'static str>,
    inner: Option<Box<ValidationError>>,
}

impl ValidationError {
    /// Record a failure at the caller's location
    #[track_caller]
    pub fn new(kind: FailureKind, template: &'static str) -> Self {
        Self {
            kind,
            detail: MessageDetail::new(template),
            error_type: kind.default_variant(),
            origin: Location::caller(),
            step: None,
            cause_type: None,
            inner: None,
        }
    }

    /// Append a message argument
    pub fn arg(mut self, arg: MessageArg) -> Self {
        self.detail.args.push(arg);
        self
    }

    /// Append an argument that is always rendered
    pub fn safe_arg(self, value: impl Into<Cow<'static, str>>) -> Self {
        self.arg(MessageArg::safe(value))
    }

    /// Append an argument that is redacted by default
    pub fn sensitive_arg(self, value: impl Into<Cow<'static, str>>) -> Self {
        self.arg(MessageArg::sensitive(value))
    }

    /// Attach the failure that caused this one
    pub fn with_inner(mut self, inner: ValidationError) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    /// Override the variant this failure materializes into
    pub fn with_error_type(mut self, variant: ErrorVariant) -> Self {
        self.error_type = variant;
        self
    }

    /// Classify the underlying cause, e.g. `fetch_error` or `timeout`
    pub fn with_cause_type(mut self, cause_type: &'static str) -> Self {
        self.cause_type = Some(cause_type);
        self
    }

    /// Tag the pipeline step that reported the failure
    pub fn with_step(mut self, step: ValidationStep) -> Self {
        self.step = Some(step);
        self
    }

    /// Failure kind
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Recorded error variant
    pub fn error_type(&self) -> ErrorVariant {
        self.error_type
    }

    /// Source location that created this failure
    pub fn origin(&self) -> &'static Location<'static> {
        self.origin
    }

    /// Pipeline step, when known
    pub fn step(&self) -> Option<ValidationStep> {
        self.step
    }

    /// Class of the underlying cause, when one was recorded
    pub fn cause_type(&self) -> Option<&'static str> {
        self.cause_type
    }

    /// Unformatted message
    pub fn message_detail(&self) -> &MessageDetail {
        &self.detail
    }

    /// Direct cause
    pub fn inner(&self) -> Option<&ValidationError> {
        self.inner.as_deref()
    }

    /// This failure followed by its causes, outermost first
    pub fn chain(&self) -> impl Iterator<Item = &ValidationError> {
        std::iter::successors(Some(self), |e| e.inner())
    }

    /// Message with sensitive arguments redacted
    pub fn message(&self) -> String {
        self.detail.format(false)
    }

    /// Build the error object using the base table and redacted messages
    pub fn materialize(&self) -> TokenValidationError {
        self.materialize_with(&ErrorMap::base(), false)
    }

    /// Build the error object using `map`
    ///
    /// Inner failures are materialized first so the resulting `source()`
    /// chain has the same length and order as the inner links.
    pub fn materialize_with(&self, map: &ErrorMap, show_sensitive: bool) -> TokenValidationError {
        let cause = self
            .inner
            .as_ref()
            .map(|inner| Box::new(inner.materialize_with(map, show_sensitive)));

        TokenValidationError {
            variant: map.resolve(self),
            kind: self.kind,
            step: self.step,
            cause_type: self.cause_type,
            message: self.detail.format(show_sensitive),
            origin: self.origin,
            cause,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message())
    }
}

/// Materialized validation error
#[derive(Debug)]
pub struct TokenValidationError {
    variant: ErrorVariant,
    kind: FailureKind,
    step: Option<ValidationStep>,
    cause_type: Option<&'static str>,
    message: String,
    origin: &'static Location<'static>,
    cause: Option<Box<TokenValidationError>>,
}

impl fmt::Display for TokenValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.variant, self.message)
    }
}

// `source()` yields the inner error, not its box, so every link downcasts.
impl std::error::Error for TokenValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl TokenValidationError {
    /// Error variant
    pub fn variant(&self) -> ErrorVariant {
        self.variant
    }

    /// Failure kind
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Pipeline step, when known
    pub fn step(&self) -> Option<ValidationStep> {
        self.step
    }

    /// Class of the underlying cause, when one was recorded
    pub fn cause_type(&self) -> Option<&'static str> {
        self.cause_type
    }

    /// Formatted message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Source location of the original failure
    pub fn origin(&self) -> &'static Location<'static> {
        self.origin
    }

    /// Direct cause
    pub fn cause(&self) -> Option<&TokenValidationError> {
        self.cause.as_deref()
    }
}
