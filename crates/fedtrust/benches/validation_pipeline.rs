//! Validation pipeline benchmarks
//!
//! Run with:
//! ```bash
//! cargo bench -p fedtrust --bench validation_pipeline
//! ```

use std::hint::black_box;
use std::time::{Duration, UNIX_EPOCH};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use fedtrust::metadata::{OpenIdConfiguration, SigningKey};
use fedtrust::token::{JwtParser, TokenParser};
use fedtrust::validation::{ValidationParameters, validate_token};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::json;

const SECRET: &[u8] = b"secret-key-material";
const NOW: u64 = 1_750_000_000;

fn configuration(key_count: usize) -> OpenIdConfiguration {
    OpenIdConfiguration {
        issuer: Some("https://login.example.com".to_string()),
        signing_keys: (0..key_count)
            .map(|i| {
                SigningKey::from_json(json!({
                    "kty": "oct",
                    "kid": format!("k{i}"),
                    "alg": "HS256",
                    "k": "c2VjcmV0LWtleS1tYXRlcmlhbA",
                }))
                .expect("valid jwk")
            })
            .collect(),
        ..Default::default()
    }
}

fn mint(kid: Option<&str>) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = kid.map(str::to_string);
    let claims = json!({
        "iss": "https://login.example.com",
        "sub": "user-42",
        "aud": "api://orders",
        "nbf": NOW - 60,
        "exp": NOW + 3600,
    });
    jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(SECRET)).expect("encode")
}

fn parameters() -> ValidationParameters {
    ValidationParameters::new()
        .with_allowed_algorithms(["HS256"])
        .with_valid_audiences(["api://orders"])
        .with_current_time(UNIX_EPOCH + Duration::from_secs(NOW))
}

fn bench_parse(c: &mut Criterion) {
    let raw = mint(Some("k0"));
    let parser = JwtParser::new();

    c.bench_function("jwt_parse", |b| {
        b.iter(|| black_box(parser.parse(black_box(&raw))))
    });
}

/// Tokens with a `kid` resolve one key, tokens without try the whole set
fn bench_validate_by_key_count(c: &mut Criterion) {
    let parser = JwtParser::new();
    let parameters = parameters();
    let mut group = c.benchmark_group("validate_token");

    for key_count in [1usize, 8, 32] {
        let configuration = configuration(key_count);
        let last_kid = format!("k{}", key_count - 1);
        let with_kid = parser.parse(&mint(Some(&last_kid))).expect("parse");
        let without_kid = parser.parse(&mint(None)).expect("parse");

        group.bench_with_input(BenchmarkId::new("with_kid", key_count), &with_kid, |b, token| {
            b.iter(|| black_box(validate_token(token, &configuration, &parameters)))
        });
        group.bench_with_input(
            BenchmarkId::new("without_kid", key_count),
            &without_kid,
            |b, token| b.iter(|| black_box(validate_token(token, &configuration, &parameters))),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_validate_by_key_count);
criterion_main!(benches);
