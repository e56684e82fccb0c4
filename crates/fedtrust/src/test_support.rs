//! Fixtures shared by unit tests

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};

use crate::metadata::SigningKey;
use crate::token::{JwtParser, SecurityToken, TokenParser};

pub(crate) const SECRET: &[u8] = b"secret-key-material";

pub(crate) fn oct_jwk(kid: &str) -> Value {
    json!({"kty": "oct", "kid": kid, "alg": "HS256", "k": "c2VjcmV0LWtleS1tYXRlcmlhbA"})
}

pub(crate) fn oct_key(kid: &str) -> SigningKey {
    SigningKey::from_json(oct_jwk(kid)).unwrap()
}

pub(crate) fn jwks_document(kids: &[&str]) -> String {
    let keys: Vec<Value> = kids.iter().map(|kid| oct_jwk(kid)).collect();
    json!({ "keys": keys }).to_string()
}

pub(crate) fn mint_hs256(kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

pub(crate) fn hs256_token(kid: &str, claims: Value) -> SecurityToken {
    JwtParser::new().parse(&mint_hs256(kid, &claims)).unwrap()
}
