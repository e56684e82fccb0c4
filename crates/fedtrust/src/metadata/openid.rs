//! OpenID Connect discovery and JWKS documents

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{
    ConfigurationRetriever, MetadataParser, SigningKey, SigningMetadata, parse_key_set,
};
use crate::error::{ConfigError, ConfigResult};
use crate::source::{MetadataSource, RawDocument};

/// OpenID Connect provider configuration with its resolved signing keys
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenIdConfiguration {
    /// Issuer identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Location of the provider's JWKS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,

    /// Authorization endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,

    /// Token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// UserInfo endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// Algorithms the provider signs ID tokens with
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub id_token_signing_alg_values_supported: Vec<String>,

    /// Keys loaded from `jwks_uri`
    #[serde(skip)]
    pub signing_keys: Vec<SigningKey>,

    /// Remaining discovery fields
    #[serde(flatten)]
    pub additional: HashMap<String, Value>,
}

impl SigningMetadata for OpenIdConfiguration {
    fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    fn signing_keys(&self) -> &[SigningKey] {
        &self.signing_keys
    }
}

/// Parses a bare JWKS document
///
/// The issuer, when set, is attached to the produced configuration since a
/// JWKS document does not carry one.
#[derive(Debug, Clone, Default)]
pub struct JwksParser {
    issuer: Option<String>,
}

impl JwksParser {
    /// Parser that leaves the issuer unset
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser that attributes the keys to `issuer`
    pub fn with_issuer(issuer: impl Into<String>) -> Self {
        Self {
            issuer: Some(issuer.into()),
        }
    }
}

impl MetadataParser<OpenIdConfiguration> for JwksParser {
    fn parse(&self, document: &RawDocument) -> ConfigResult<OpenIdConfiguration> {
        let value: Value = document.json()?;
        Ok(OpenIdConfiguration {
            issuer: self.issuer.clone(),
            jwks_uri: Some(document.address.clone()),
            signing_keys: parse_key_set(&value)?,
            ..Default::default()
        })
    }
}

/// Parses a discovery document without following `jwks_uri`
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenIdDiscoveryParser;

impl MetadataParser<OpenIdConfiguration> for OpenIdDiscoveryParser {
    fn parse(&self, document: &RawDocument) -> ConfigResult<OpenIdConfiguration> {
        document.json()
    }
}

/// Fetches a discovery document, then the key set it points to
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenIdConnectRetriever;

impl OpenIdConnectRetriever {
    /// Create the retriever
    pub fn new() -> Self {
        Self
    }
}

fn resolve_jwks_uri(discovery_address: &str, jwks_uri: &str) -> String {
    match url::Url::parse(discovery_address).and_then(|base| base.join(jwks_uri)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => jwks_uri.to_string(),
    }
}

#[async_trait]
impl ConfigurationRetriever<OpenIdConfiguration> for OpenIdConnectRetriever {
    async fn retrieve(
        &self,
        address: &str,
        source: &dyn MetadataSource,
    ) -> ConfigResult<OpenIdConfiguration> {
        let discovery = source.fetch(address).await?;
        let mut configuration = OpenIdDiscoveryParser.parse(&discovery)?;

        let jwks_uri = configuration
            .jwks_uri
            .as_deref()
            .map(|uri| resolve_jwks_uri(address, uri))
            .ok_or_else(|| ConfigError::parse("discovery document has no 'jwks_uri'"))?;

        debug!(address = %address, jwks_uri = %jwks_uri, "following jwks_uri");
        let jwks = source.fetch(&jwks_uri).await?;
        let value: Value = jwks.json()?;
        configuration.signing_keys = parse_key_set(&value)?;
        configuration.jwks_uri = Some(jwks_uri);

        Ok(configuration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticMetadataSource;
    use crate::test_support::oct_jwk;
    use serde_json::json;

    const DISCOVERY: &str = "https://idp.example.com/.well-known/openid-configuration";

    fn discovery_body(jwks_uri: &str) -> String {
        json!({
            "issuer": "https://idp.example.com",
            "jwks_uri": jwks_uri,
            "token_endpoint": "https://idp.example.com/token",
            "id_token_signing_alg_values_supported": ["RS256"],
            "claims_supported": ["sub", "email"],
        })
        .to_string()
    }

    #[test]
    fn test_jwks_parser_attaches_issuer() {
        let doc = RawDocument::new(
            "memory://jwks",
            json!({"keys": [oct_jwk("k1")]}).to_string(),
        );
        let config = JwksParser::with_issuer("https://idp").parse(&doc).unwrap();
        assert_eq!(config.issuer(), Some("https://idp"));
        assert_eq!(config.signing_keys().len(), 1);
    }

    #[test]
    fn test_discovery_parser_keeps_unknown_fields() {
        let doc = RawDocument::new(DISCOVERY, discovery_body("https://idp.example.com/jwks"));
        let config = OpenIdDiscoveryParser.parse(&doc).unwrap();
        assert_eq!(config.issuer.as_deref(), Some("https://idp.example.com"));
        assert!(config.additional.contains_key("claims_supported"));
        assert!(config.signing_keys.is_empty());
    }

    #[tokio::test]
    async fn test_retriever_follows_relative_jwks_uri() {
        let source = StaticMetadataSource::with_document(DISCOVERY, discovery_body("/keys"));
        source.set_document(
            "https://idp.example.com/keys",
            json!({"keys": [oct_jwk("a"), oct_jwk("b")]}).to_string(),
        );

        let config = OpenIdConnectRetriever
            .retrieve(DISCOVERY, &source)
            .await
            .unwrap();
        assert_eq!(config.signing_keys().len(), 2);
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_retriever_requires_jwks_uri() {
        let source = StaticMetadataSource::with_document(
            DISCOVERY,
            json!({"issuer": "https://idp.example.com"}).to_string(),
        );
        let err = OpenIdConnectRetriever
            .retrieve(DISCOVERY, &source)
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "parse_error");
    }
}
