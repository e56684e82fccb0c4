//! JWS compact serialization parser

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::de::DeserializeOwned;

use super::{SecurityToken, TokenParser};
use crate::validation::{FailureKind, ValidationError, ValidationResult};

/// Default upper bound on token size in bytes
pub const DEFAULT_MAX_TOKEN_SIZE: usize = 250_000;

/// Parses `header.payload.signature` tokens
///
/// Only the structure is checked here. Nothing about the signature, issuer or
/// lifetime is trusted until the validation pipeline has run.
#[derive(Debug, Clone, Copy)]
pub struct JwtParser {
    max_token_size: usize,
}

impl Default for JwtParser {
    fn default() -> Self {
        Self {
            max_token_size: DEFAULT_MAX_TOKEN_SIZE,
        }
    }
}

impl JwtParser {
    /// Parser with the default size limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject tokens longer than `max_token_size` bytes
    pub fn with_max_token_size(max_token_size: usize) -> Self {
        Self { max_token_size }
    }
}

fn decode_segment(segment: &str, name: &'static str) -> ValidationResult<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        ValidationError::new(
            FailureKind::MalformedToken,
            "{0} segment is not valid base64url: {1}",
        )
        .safe_arg(name)
        .safe_arg(e.to_string())
    })
}

fn decode_json<T: DeserializeOwned>(segment: &str, name: &'static str) -> ValidationResult<T> {
    let bytes = decode_segment(segment, name)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        ValidationError::new(FailureKind::MalformedToken, "{0} is not valid JSON: {1}")
            .safe_arg(name)
            .safe_arg(e.to_string())
    })
}

impl TokenParser for JwtParser {
    fn parse(&self, raw: &str) -> ValidationResult<SecurityToken> {
        if raw.is_empty() {
            return Err(ValidationError::new(
                FailureKind::MalformedToken,
                "token is empty",
            ));
        }
        if raw.len() > self.max_token_size {
            return Err(ValidationError::new(
                FailureKind::MalformedToken,
                "token size {0} exceeds the limit of {1} bytes",
            )
            .safe_arg(raw.len().to_string())
            .safe_arg(self.max_token_size.to_string()));
        }

        let segments: Vec<&str> = raw.split('.').collect();
        match segments.len() {
            3 => {}
            5 => {
                return Err(ValidationError::new(
                    FailureKind::MalformedToken,
                    "encrypted tokens are not supported",
                ));
            }
            n => {
                return Err(ValidationError::new(
                    FailureKind::MalformedToken,
                    "expected 3 dot-separated segments, found {0}: '{1}'",
                )
                .safe_arg(n.to_string())
                .sensitive_arg(raw.to_string()));
            }
        }

        let header = decode_json(segments[0], "header")?;
        let claims = decode_json(segments[1], "payload")?;
        let signature = decode_segment(segments[2], "signature")?;
        let signed_len = segments[0].len() + 1 + segments[1].len();

        Ok(SecurityToken::new(
            header,
            claims,
            raw.as_bytes()[..signed_len].to_vec(),
            signature,
            raw,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn segment(value: &serde_json::Value) -> String {
        URL_SAFE_NO_PAD.encode(value.to_string())
    }

    fn compact(header: &serde_json::Value, claims: &serde_json::Value, signature: &[u8]) -> String {
        format!(
            "{}.{}.{}",
            segment(header),
            segment(claims),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    #[test]
    fn test_parses_header_claims_and_signature() {
        let raw = compact(
            &json!({"alg": "RS256", "kid": "k1", "typ": "JWT"}),
            &json!({"iss": "https://idp", "aud": "api", "exp": 10}),
            b"sig",
        );
        let token = JwtParser::new().parse(&raw).unwrap();

        assert_eq!(token.header.algorithm.as_deref(), Some("RS256"));
        assert_eq!(token.header.key_id.as_deref(), Some("k1"));
        assert_eq!(token.claims.audiences, vec!["api"]);
        assert_eq!(token.signature, b"sig");
        let last_dot = raw.rfind('.').unwrap();
        assert_eq!(token.signed_payload, raw[..last_dot].as_bytes());
    }

    #[test]
    fn test_unsigned_token_has_empty_signature() {
        let raw = compact(&json!({"alg": "none"}), &json!({"sub": "x"}), b"");
        let token = JwtParser::new().parse(&raw).unwrap();
        assert!(!token.is_signed());
    }

    #[test]
    fn test_rejects_wrong_segment_counts() {
        let parser = JwtParser::new();
        for raw in ["", "abc", "a.b", "a.b.c.d"] {
            let err = parser.parse(raw).unwrap_err();
            assert_eq!(err.kind(), FailureKind::MalformedToken, "input {raw:?}");
        }

        let err = parser.parse("a.b.c.d.e").unwrap_err();
        assert!(err.message().contains("encrypted"));
    }

    #[test]
    fn test_segment_count_message_redacts_token() {
        let err = JwtParser::new().parse("secret.token").unwrap_err();
        assert!(!err.message().contains("secret.token"));
        assert!(
            err.message_detail()
                .format(true)
                .contains("secret.token")
        );
    }

    #[test]
    fn test_rejects_invalid_json_and_base64() {
        let parser = JwtParser::new();
        let bad_json = format!("{}.{}.", URL_SAFE_NO_PAD.encode("{"), segment(&json!({})));
        assert!(parser.parse(&bad_json).unwrap_err().message().contains("header"));

        let bad_b64 = format!("{}.!!!.", segment(&json!({"alg": "HS256"})));
        assert!(parser.parse(&bad_b64).unwrap_err().message().contains("payload"));
    }

    #[test]
    fn test_size_limit() {
        let raw = compact(&json!({"alg": "HS256"}), &json!({"sub": "x"}), b"s");
        let parser = JwtParser::with_max_token_size(8);
        let err = parser.parse(&raw).unwrap_err();
        assert!(err.message().contains("exceeds"));
    }
}
