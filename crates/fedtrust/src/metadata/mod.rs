//! Trust metadata model, parsing and retrieval
//!
//! Identity-provider metadata flows through three injected capabilities:
//!
//! - [`MetadataParser`] turns a [`RawDocument`] into a typed configuration
//! - [`ConfigurationValidator`] checks that configuration against a policy
//! - [`ConfigurationRetriever`] drives one or more fetches to assemble it
//!
//! The pipeline only needs issuer and key material, exposed through
//! [`SigningMetadata`].

mod openid;

pub use openid::{JwksParser, OpenIdConfiguration, OpenIdConnectRetriever, OpenIdDiscoveryParser};

use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::Jwk;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::source::{MetadataSource, RawDocument};

/// A verification key published by an identity provider
///
/// Cheap to clone. The decoding key is built on first use and reused.
#[derive(Clone)]
pub struct SigningKey {
    inner: Arc<SigningKeyInner>,
}

struct SigningKeyInner {
    jwk: Jwk,
    key_id: Option<String>,
    algorithm: Option<String>,
    key_use: Option<String>,
    decoding_key: OnceLock<Result<DecodingKey, String>>,
}

impl SigningKey {
    /// Wrap a parsed JWK
    pub fn from_jwk(jwk: Jwk) -> Self {
        let algorithm = jwk
            .common
            .key_algorithm
            .as_ref()
            .and_then(|alg| serde_json::to_value(alg).ok())
            .and_then(|v| v.as_str().map(str::to_owned));
        let key_use = jwk
            .common
            .public_key_use
            .as_ref()
            .and_then(|u| serde_json::to_value(u).ok())
            .and_then(|v| v.as_str().map(str::to_owned));

        Self {
            inner: Arc::new(SigningKeyInner {
                key_id: jwk.common.key_id.clone(),
                algorithm,
                key_use,
                jwk,
                decoding_key: OnceLock::new(),
            }),
        }
    }

    /// Parse one JWK object
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the value is not a usable JWK.
    pub fn from_json(value: Value) -> ConfigResult<Self> {
        let jwk: Jwk = serde_json::from_value(value)
            .map_err(|e| ConfigError::parse(format!("invalid JWK: {e}")))?;
        Ok(Self::from_jwk(jwk))
    }

    /// Key identifier (`kid`)
    pub fn key_id(&self) -> Option<&str> {
        self.inner.key_id.as_deref()
    }

    /// Declared algorithm (`alg`)
    pub fn algorithm(&self) -> Option<&str> {
        self.inner.algorithm.as_deref()
    }

    /// Declared use (`use`)
    pub fn key_use(&self) -> Option<&str> {
        self.inner.key_use.as_deref()
    }

    /// Underlying JWK
    pub fn jwk(&self) -> &Jwk {
        &self.inner.jwk
    }

    /// Key material for signature verification
    ///
    /// # Errors
    ///
    /// Returns the crypto provider's message when the JWK cannot be converted.
    pub fn decoding_key(&self) -> Result<&DecodingKey, &str> {
        self.inner
            .decoding_key
            .get_or_init(|| DecodingKey::from_jwk(&self.inner.jwk).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(String::as_str)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.inner.key_id)
            .field("algorithm", &self.inner.algorithm)
            .field("key_use", &self.inner.key_use)
            .finish_non_exhaustive()
    }
}

impl PartialEq for SigningKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.jwk == other.inner.jwk
    }
}

/// Parse the `keys` array of a JWKS document
///
/// Keys declared for encryption and keys that fail to parse are skipped.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] when the document has no `keys` array.
pub fn parse_key_set(document: &Value) -> ConfigResult<Vec<SigningKey>> {
    let keys = document
        .get("keys")
        .and_then(Value::as_array)
        .ok_or_else(|| ConfigError::parse("JWKS document has no 'keys' array"))?;

    let mut signing_keys = Vec::with_capacity(keys.len());
    for key in keys {
        if key.get("use").and_then(Value::as_str) == Some("enc") {
            debug!(kid = ?key.get("kid"), "skipping encryption key");
            continue;
        }
        match SigningKey::from_json(key.clone()) {
            Ok(key) => signing_keys.push(key),
            Err(e) => warn!(kid = ?key.get("kid"), error = %e, "skipping unusable JWK"),
        }
    }
    Ok(signing_keys)
}

/// Issuer and key material the validation pipeline consumes
pub trait SigningMetadata: Send + Sync {
    /// Issuer the metadata speaks for, if it declares one
    fn issuer(&self) -> Option<&str>;

    /// Keys usable for signature verification
    fn signing_keys(&self) -> &[SigningKey];
}

/// Parses a raw document into configuration
pub trait MetadataParser<T>: Send + Sync {
    /// Parse `document`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed documents.
    fn parse(&self, document: &RawDocument) -> ConfigResult<T>;
}

impl<T, F> MetadataParser<T> for F
where
    F: Fn(&RawDocument) -> ConfigResult<T> + Send + Sync,
{
    fn parse(&self, document: &RawDocument) -> ConfigResult<T> {
        self(document)
    }
}

/// Checks parsed configuration against a policy
pub trait ConfigurationValidator<T>: Send + Sync {
    /// Validate `configuration`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the policy is not met.
    fn validate(&self, configuration: &T) -> ConfigResult<()>;
}

/// Requires a minimum number of signing keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningKeyCountValidator {
    /// Fewest keys accepted
    pub minimum_keys: usize,
}

impl SigningKeyCountValidator {
    /// Require at least `minimum_keys` keys
    pub fn new(minimum_keys: usize) -> Self {
        Self { minimum_keys }
    }
}

impl Default for SigningKeyCountValidator {
    fn default() -> Self {
        Self { minimum_keys: 1 }
    }
}

impl<T: SigningMetadata> ConfigurationValidator<T> for SigningKeyCountValidator {
    fn validate(&self, configuration: &T) -> ConfigResult<()> {
        let found = configuration.signing_keys().len();
        if found < self.minimum_keys {
            return Err(ConfigError::invalid(format!(
                "expected at least {} signing key(s), found {found}",
                self.minimum_keys
            )));
        }
        Ok(())
    }
}

/// Assembles configuration from one or more fetches
#[async_trait]
pub trait ConfigurationRetriever<T>: Send + Sync {
    /// Retrieve configuration published at `address`
    ///
    /// # Errors
    ///
    /// Propagates fetch and parse failures.
    async fn retrieve(&self, address: &str, source: &dyn MetadataSource) -> ConfigResult<T>;
}

/// Single fetch followed by a parse
#[derive(Debug, Clone, Default)]
pub struct DocumentRetriever<P> {
    parser: P,
}

impl<P> DocumentRetriever<P> {
    /// Retrieve documents with `parser`
    pub fn new(parser: P) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl<T, P> ConfigurationRetriever<T> for DocumentRetriever<P>
where
    T: Send + 'static,
    P: MetadataParser<T>,
{
    async fn retrieve(&self, address: &str, source: &dyn MetadataSource) -> ConfigResult<T> {
        let document = source.fetch(address).await?;
        self.parser.parse(&document)
    }
}
