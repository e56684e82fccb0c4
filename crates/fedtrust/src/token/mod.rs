//! Parsed, not yet validated security tokens
//!
//! A [`TokenParser`] turns token text into a [`SecurityToken`]. The JWS compact
//! parser lives in [`jwt`]; other formats plug in by implementing the trait.

pub mod jwt;

pub use jwt::JwtParser;

use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::validation::ValidationResult;

/// Token header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenHeader {
    /// Signing algorithm (`alg`)
    #[serde(rename = "alg", default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,

    /// Key identifier (`kid`)
    #[serde(rename = "kid", default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,

    /// Media type (`typ`)
    #[serde(rename = "typ", default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Other header parameters
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

/// Token claims
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer (`iss`)
    #[serde(rename = "iss", default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Subject (`sub`)
    #[serde(rename = "sub", default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Audiences (`aud`), a single string or an array on the wire
    #[serde(
        rename = "aud",
        default,
        deserialize_with = "deserialize_audiences",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub audiences: Vec<String>,

    /// Not before (`nbf`), seconds since the epoch
    #[serde(
        rename = "nbf",
        default,
        deserialize_with = "deserialize_numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub not_before: Option<u64>,

    /// Expiration (`exp`), seconds since the epoch
    #[serde(
        rename = "exp",
        default,
        deserialize_with = "deserialize_numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires: Option<u64>,

    /// Issued at (`iat`), seconds since the epoch
    #[serde(
        rename = "iat",
        default,
        deserialize_with = "deserialize_numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub issued_at: Option<u64>,

    /// Remaining claims
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

impl TokenClaims {
    /// Look up a claim that has no dedicated field
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.additional.get(name)
    }
}

fn deserialize_audiences<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Audience {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<Audience>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Audience::One(audience)) => vec![audience],
        Some(Audience::Many(audiences)) => audiences,
    })
}

fn deserialize_numeric_date<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(secs) = n.as_u64() {
                Ok(Some(secs))
            } else if let Some(secs) = n.as_f64().filter(|f| f.is_finite() && *f >= 0.0) {
                Ok(Some(secs.floor() as u64))
            } else {
                Err(de::Error::custom(format!("invalid NumericDate {n}")))
            }
        }
        Some(other) => Err(de::Error::custom(format!(
            "NumericDate must be a number, got {other}"
        ))),
    }
}

/// A structured token awaiting validation
#[derive(Clone, PartialEq)]
pub struct SecurityToken {
    /// Parsed header
    pub header: TokenHeader,
    /// Parsed claims
    pub claims: TokenClaims,
    /// Bytes covered by the signature
    pub signed_payload: Vec<u8>,
    /// Raw signature bytes, empty for unsigned tokens
    pub signature: Vec<u8>,
    raw: String,
}

impl SecurityToken {
    /// Assemble a token from its parts
    pub fn new(
        header: TokenHeader,
        claims: TokenClaims,
        signed_payload: Vec<u8>,
        signature: Vec<u8>,
        raw: impl Into<String>,
    ) -> Self {
        Self {
            header,
            claims,
            signed_payload,
            signature,
            raw: raw.into(),
        }
    }

    /// Token text as received
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether the token carries a signature
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }
}

// Token text and signature are credentials, keep them out of logs.
impl fmt::Debug for SecurityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityToken")
            .field("header", &self.header)
            .field("claims", &self.claims)
            .field("signature_len", &self.signature.len())
            .finish_non_exhaustive()
    }
}

/// Turns token text into a [`SecurityToken`]
pub trait TokenParser: Send + Sync + fmt::Debug {
    /// Parse `raw`
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`](crate::validation::ValidationError) of
    /// kind `MalformedToken` when the text is not a well-formed token.
    fn parse(&self, raw: &str) -> ValidationResult<SecurityToken>;
}
