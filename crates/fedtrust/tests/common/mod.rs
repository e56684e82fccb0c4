//! Shared fixtures for integration tests
//!
//! Tokens are HS256-signed with a symmetric `oct` key so tests need no key
//! generation. `MockIdentityProvider` serves discovery and JWKS documents
//! over HTTP via wiremock.

#![allow(dead_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fedtrust::metadata::{OpenIdConfiguration, SigningKey};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const SECRET: &[u8] = b"secret-key-material";
pub const ISSUER: &str = "https://login.example.com";
pub const AUDIENCE: &str = "api://orders";

/// Base64url of [`SECRET`]
const SECRET_B64: &str = "c2VjcmV0LWtleS1tYXRlcmlhbA";

pub fn oct_jwk(kid: &str) -> Value {
    json!({"kty": "oct", "kid": kid, "alg": "HS256", "use": "sig", "k": SECRET_B64})
}

pub fn jwks_document(kids: &[&str]) -> String {
    let keys: Vec<Value> = kids.iter().map(|kid| oct_jwk(kid)).collect();
    json!({ "keys": keys }).to_string()
}

/// Configuration holding the given keys, issued by [`ISSUER`]
pub fn configuration(kids: &[&str]) -> OpenIdConfiguration {
    OpenIdConfiguration {
        issuer: Some(ISSUER.to_string()),
        signing_keys: kids
            .iter()
            .map(|kid| SigningKey::from_json(oct_jwk(kid)).unwrap())
            .collect(),
        ..Default::default()
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

pub fn at_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

/// Claims valid for an hour around `now`
pub fn claims_at(now: u64) -> Value {
    json!({
        "iss": ISSUER,
        "sub": "user-42",
        "aud": AUDIENCE,
        "nbf": now - 60,
        "iat": now - 60,
        "exp": now + 3600,
    })
}

pub fn mint(kid: Option<&str>, claims: &Value) -> String {
    mint_with_secret(kid, claims, SECRET)
}

pub fn mint_with_secret(kid: Option<&str>, claims: &Value, secret: &[u8]) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = kid.map(str::to_string);
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(secret)).unwrap()
}

/// HS256 is not in the default allow list
pub fn hs256_parameters() -> fedtrust::ValidationParameters {
    fedtrust::ValidationParameters::new()
        .with_allowed_algorithms(["HS256"])
        .with_valid_audiences([AUDIENCE])
}

/// Identity provider serving discovery and JWKS documents
pub struct MockIdentityProvider {
    pub server: MockServer,
    pub discovery_endpoint: String,
    pub jwks_endpoint: String,
}

impl MockIdentityProvider {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let base_url = server.uri();

        Self {
            server,
            discovery_endpoint: format!("{}/.well-known/openid-configuration", base_url),
            jwks_endpoint: format!("{}/keys", base_url),
        }
    }

    /// Serve a discovery document pointing at a relative `keys` path
    pub async fn mock_discovery(&self) {
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": ISSUER,
                "jwks_uri": "/keys",
                "authorization_endpoint": format!("{}/authorize", ISSUER),
                "token_endpoint": format!("{}/token", ISSUER),
                "id_token_signing_alg_values_supported": ["RS256", "HS256"],
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_jwks(&self, kids: &[&str]) {
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_string(jwks_document(kids)))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_jwks_status(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Drop every mounted response
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    pub async fn request_count(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == request_path)
            .count()
    }
}
