//! Configuration cache behaviour over time
//!
//! All tests run on a paused tokio clock and drive it with
//! `tokio::time::advance`, so refresh intervals of hours cost nothing.
//! Tests cover:
//! - Freshness (no I/O inside the automatic refresh interval)
//! - Stale-but-available on refresh failure
//! - First fetch failures surfacing the fetch or parse error
//! - The minimum refresh floor for manual refreshes
//! - Callers arriving during an in-flight refresh
//! - Refresh telemetry tags

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ISSUER, jwks_document};
use fedtrust::cache::{ConfigurationCache, RefreshPolicy};
use fedtrust::error::ConfigError;
use fedtrust::metadata::{
    DocumentRetriever, JwksParser, OpenIdConfiguration, SigningKeyCountValidator,
};
use fedtrust::source::{MetadataSource, StaticMetadataSource};
use fedtrust::telemetry::{RecordingTelemetry, TelemetrySink};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

const ADDRESS: &str = "https://login.example.com/discovery/keys";
const DAY: Duration = Duration::from_secs(24 * 3600);

struct Fixture {
    source: Arc<StaticMetadataSource>,
    telemetry: Arc<RecordingTelemetry>,
    cache: ConfigurationCache<OpenIdConfiguration>,
}

fn fixture(policy: RefreshPolicy, minimum_keys: usize) -> Fixture {
    let source = Arc::new(StaticMetadataSource::with_document(
        ADDRESS,
        jwks_document(&["k1"]),
    ));
    let telemetry = Arc::new(RecordingTelemetry::new());
    let cache = ConfigurationCache::builder(
        ADDRESS,
        Arc::clone(&source) as Arc<dyn MetadataSource>,
        DocumentRetriever::new(JwksParser::with_issuer(ISSUER)),
    )
    .validator(SigningKeyCountValidator::new(minimum_keys))
    .policy(policy)
    .telemetry(Arc::clone(&telemetry) as Arc<dyn TelemetrySink>)
    .build();

    Fixture {
        source,
        telemetry,
        cache,
    }
}

fn daily(minimum: Duration) -> RefreshPolicy {
    RefreshPolicy::new(DAY, minimum, Duration::from_secs(5)).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_first_call_fetches_and_tags_first_refresh() {
    let f = fixture(daily(Duration::ZERO), 1);

    let configuration = f.cache.get_configuration().await.unwrap();

    assert!(!configuration.signing_keys.is_empty());
    assert_eq!(configuration.issuer.as_deref(), Some(ISSUER));
    assert_eq!(f.telemetry.refresh_tags(), vec!["first-refresh"]);
}

#[tokio::test(start_paused = true)]
async fn test_second_call_records_no_new_event() {
    let f = fixture(daily(Duration::ZERO), 1);

    f.cache.get_configuration().await.unwrap();
    f.cache.get_configuration().await.unwrap();

    assert_eq!(f.source.fetch_count(), 1);
    assert_eq!(f.telemetry.refreshes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_refresh_fetches_and_tags_manual() {
    let f = fixture(daily(Duration::ZERO), 1);
    f.cache.get_configuration().await.unwrap();

    f.cache.request_refresh();
    f.cache.get_configuration().await.unwrap();

    assert_eq!(f.source.fetch_count(), 2);
    assert_eq!(f.telemetry.refresh_tags(), vec!["first-refresh", "manual"]);
}

#[tokio::test(start_paused = true)]
async fn test_too_few_keys_is_configuration_invalid() {
    let f = fixture(daily(Duration::ZERO), 2);

    let err = f.cache.get_configuration().await.unwrap_err();

    assert!(matches!(err, ConfigError::Invalid(_)));
    assert_eq!(
        f.telemetry.refresh_tags(),
        vec!["failure:configuration_invalid"]
    );
    assert!(!f.cache.status().has_configuration);
}

#[tokio::test(start_paused = true)]
async fn test_fresh_configuration_is_served_without_io() {
    let f = fixture(daily(Duration::from_secs(300)), 1);
    let first = f.cache.get_configuration().await.unwrap();

    // Changing the document must not be observed before the interval ends
    f.source.set_document(ADDRESS, jwks_document(&["k1", "k2"]));
    for _ in 0..23 {
        tokio::time::advance(Duration::from_secs(3600)).await;
        let served = f.cache.get_configuration().await.unwrap();
        assert!(Arc::ptr_eq(&first, &served));
    }
    assert_eq!(f.source.fetch_count(), 1);

    tokio::time::advance(Duration::from_secs(3600)).await;
    let refreshed = f.cache.get_configuration().await.unwrap();
    assert_eq!(refreshed.signing_keys.len(), 2);
    assert_eq!(f.telemetry.refresh_tags(), vec!["first-refresh", "automatic"]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_serves_stale_configuration() {
    let f = fixture(daily(Duration::from_secs(300)), 1);
    let first = f.cache.get_configuration().await.unwrap();

    f.source.set_failure(ADDRESS, ConfigError::status(ADDRESS, 503));
    tokio::time::advance(DAY).await;

    let served = f.cache.get_configuration().await.unwrap();
    assert!(Arc::ptr_eq(&first, &served));

    let status = f.cache.status();
    assert!(status.has_configuration);
    assert_eq!(status.consecutive_failures, 1);
    assert_eq!(status.last_error, Some("fetch_error"));
    assert_eq!(
        f.telemetry.refresh_tags(),
        vec!["first-refresh", "failure:fetch_error"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_recovery_after_failures_resets_counters() {
    let f = fixture(daily(Duration::from_secs(300)), 1);
    f.cache.get_configuration().await.unwrap();

    f.source
        .set_failure(ADDRESS, ConfigError::fetch(ADDRESS, "connection reset"));
    tokio::time::advance(DAY).await;
    f.cache.get_configuration().await.unwrap();
    assert_eq!(f.cache.status().consecutive_failures, 1);

    f.source.set_document(ADDRESS, jwks_document(&["k2"]));
    tokio::time::advance(Duration::from_secs(300)).await;
    let recovered = f.cache.get_configuration().await.unwrap();

    assert_eq!(recovered.signing_keys[0].key_id(), Some("k2"));
    let status = f.cache.status();
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.last_error, None);
}

#[tokio::test(start_paused = true)]
async fn test_first_fetch_failure_surfaces_fetch_error() {
    let f = fixture(daily(Duration::ZERO), 1);
    f.source
        .set_failure(ADDRESS, ConfigError::fetch(ADDRESS, "dns lookup failed"));

    let err = f.cache.get_configuration().await.unwrap_err();

    assert!(matches!(err, ConfigError::Fetch { .. }));
    assert!(f.cache.current().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_first_fetch_failure_surfaces_parse_error() {
    let f = fixture(daily(Duration::ZERO), 1);
    f.source.set_document(ADDRESS, "<html>maintenance</html>");

    let err = f.cache.get_configuration().await.unwrap_err();

    assert!(matches!(err, ConfigError::Parse(_)));
    assert_eq!(f.telemetry.refresh_tags(), vec!["failure:parse_error"]);
}

#[tokio::test(start_paused = true)]
async fn test_manual_refreshes_respect_minimum_interval() {
    let f = fixture(daily(Duration::from_secs(300)), 1);
    f.cache.get_configuration().await.unwrap();
    tokio::time::advance(Duration::from_secs(300)).await;

    f.cache.request_refresh();
    f.cache.get_configuration().await.unwrap();
    assert_eq!(f.source.fetch_count(), 2);

    // Second request inside the floor is held back
    tokio::time::advance(Duration::from_secs(10)).await;
    f.cache.request_refresh();
    f.cache.get_configuration().await.unwrap();
    assert_eq!(f.source.fetch_count(), 2);

    // ... but not forgotten
    tokio::time::advance(Duration::from_secs(290)).await;
    f.cache.get_configuration().await.unwrap();
    assert_eq!(f.source.fetch_count(), 3);
    assert_eq!(
        f.telemetry.refresh_tags(),
        vec!["first-refresh", "manual", "manual"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_refresh_keeps_manual_request() {
    let f = fixture(daily(Duration::from_secs(300)), 1);
    f.cache.get_configuration().await.unwrap();
    tokio::time::advance(Duration::from_secs(300)).await;

    f.cache.request_refresh();
    f.source.set_delay(Some(Duration::from_secs(30)));
    let abandoned =
        tokio::time::timeout(Duration::from_secs(1), f.cache.get_configuration()).await;
    assert!(abandoned.is_err());
    assert_eq!(f.source.fetch_count(), 2);
    assert_eq!(f.cache.status().consecutive_failures, 0);

    f.source.set_delay(None);
    f.cache.get_configuration().await.unwrap();
    assert_eq!(f.source.fetch_count(), 3);
    assert_eq!(f.telemetry.refresh_tags(), vec!["first-refresh", "manual"]);
}

#[tokio::test(start_paused = true)]
async fn test_caller_during_refresh_gets_previous_snapshot() {
    let f = Arc::new(fixture(daily(Duration::ZERO), 1));
    let first = f.cache.get_configuration().await.unwrap();

    f.source.set_document(ADDRESS, jwks_document(&["k1", "k2"]));
    f.source.set_delay(Some(Duration::from_secs(10)));
    tokio::time::advance(DAY).await;

    let refresher = {
        let f = Arc::clone(&f);
        tokio::spawn(async move { f.cache.get_configuration().await })
    };
    while f.source.fetch_count() < 2 {
        tokio::task::yield_now().await;
    }

    let during = f.cache.get_configuration().await.unwrap();
    assert!(Arc::ptr_eq(&first, &during));
    assert!(!refresher.is_finished());
    assert_eq!(f.source.fetch_count(), 2);

    let refreshed = refresher.await.unwrap().unwrap();
    assert_eq!(refreshed.signing_keys.len(), 2);
    assert_eq!(f.source.fetch_count(), 2);
    assert_eq!(f.telemetry.refresh_tags(), vec!["first-refresh", "automatic"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_refresh_serves_stale_configuration() {
    let f = fixture(daily(Duration::ZERO), 1);
    let first = f.cache.get_configuration().await.unwrap();

    f.source.set_delay(Some(Duration::from_secs(60)));
    f.cache.request_refresh();

    let token = CancellationToken::new();
    token.cancel();
    let served = f.cache.get_configuration_cancellable(&token).await.unwrap();

    assert!(Arc::ptr_eq(&first, &served));
    assert_eq!(f.cache.status().consecutive_failures, 0);
    assert_eq!(
        f.telemetry.refresh_tags(),
        vec!["first-refresh", "failure:cancelled"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_timeout_with_stale_configuration_serves_it() {
    let f = fixture(daily(Duration::ZERO), 1);
    let first = f.cache.get_configuration().await.unwrap();

    f.source.set_delay(Some(Duration::from_secs(60)));
    tokio::time::advance(DAY).await;

    let served = f
        .cache
        .get_configuration_with_timeout(Duration::from_secs(1))
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &served));
    assert_eq!(f.cache.status().last_error, Some("timeout"));
}

#[test]
fn test_policy_rejects_minimum_above_automatic() {
    let policy = RefreshPolicy::new(
        Duration::from_secs(60),
        Duration::from_secs(61),
        Duration::ZERO,
    );
    assert!(policy.is_err());
}
