//! Configuration cache
//!
//! [`ConfigurationCache`] serves identity-provider metadata to any number of
//! concurrent callers:
//!
//! - **Fresh**: served from memory without I/O until the automatic refresh
//!   interval elapses or [`request_refresh`](ConfigurationCache::request_refresh)
//!   is called
//! - **Single flight**: at most one fetch runs per cache; callers arriving
//!   meanwhile receive the previous configuration, or wait when there is none
//! - **Stale but available**: a failed refresh never replaces a good
//!   configuration, the old one keeps being served
//! - **Backoff**: consecutive failures push the next attempt out exponentially,
//!   capped at the automatic refresh interval
//!
//! Configurations are handed out as `Arc<T>` and swapped wholesale, so a caller
//! holding an older snapshot is unaffected by later refreshes.

mod policy;
mod state;

pub use policy::{
    DEFAULT_AUTOMATIC_REFRESH_INTERVAL, DEFAULT_MINIMUM_REFRESH_INTERVAL, DEFAULT_RETRY_BACKOFF,
    RefreshPolicy, RefreshPolicyConfig,
};
pub use state::CacheStatus;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::metadata::{
    ConfigurationRetriever, ConfigurationValidator, DocumentRetriever, JwksParser,
    OpenIdConfiguration, OpenIdConnectRetriever, SigningKeyCountValidator,
};
use crate::source::MetadataSource;
use crate::telemetry::{
    LIBRARY_ID, NoopTelemetry, RefreshEvent, RefreshReason, RefreshStatus, TelemetrySink,
};
use state::{CacheState, Plan};

/// Supplies configuration to the validation pipeline
#[async_trait]
pub trait ConfigurationProvider<T>: Send + Sync {
    /// Current configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when no configuration can be provided.
    async fn configuration(&self) -> ConfigResult<Arc<T>>;

    /// Ask for fresh configuration on the next call
    fn request_refresh(&self);
}

/// Fixed configuration, never refreshed
#[derive(Debug)]
pub struct StaticConfiguration<T> {
    configuration: Arc<T>,
}

impl<T> StaticConfiguration<T> {
    /// Always provide `configuration`
    pub fn new(configuration: T) -> Self {
        Self {
            configuration: Arc::new(configuration),
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> ConfigurationProvider<T> for StaticConfiguration<T> {
    async fn configuration(&self) -> ConfigResult<Arc<T>> {
        Ok(Arc::clone(&self.configuration))
    }

    fn request_refresh(&self) {}
}

/// Why a bounded wait ended early
enum Interrupted {
    Timeout,
    Cancelled,
}

/// Caches configuration fetched from one metadata address
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use fedtrust::cache::ConfigurationCache;
/// use fedtrust::source::HttpMetadataSource;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source = Arc::new(HttpMetadataSource::new()?);
/// let cache = ConfigurationCache::openid_connect(
///     "https://login.example.com/.well-known/openid-configuration",
///     source,
/// );
///
/// let configuration = cache.get_configuration().await?;
/// println!("{} signing keys", configuration.signing_keys.len());
/// # Ok(())
/// # }
/// ```
pub struct ConfigurationCache<T> {
    address: String,
    source: Arc<dyn MetadataSource>,
    retriever: Arc<dyn ConfigurationRetriever<T>>,
    validator: Option<Arc<dyn ConfigurationValidator<T>>>,
    policy: RefreshPolicy,
    telemetry: Arc<dyn TelemetrySink>,
    state: RwLock<CacheState<T>>,
    refresh_requested: AtomicBool,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl<T> fmt::Debug for ConfigurationCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationCache")
            .field("address", &self.address)
            .field("source", &self.source)
            .field("policy", &self.policy)
            .field("refresh_requested", &self.refresh_requested)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> ConfigurationCache<T> {
    /// Start building a cache for `address`
    pub fn builder<R>(
        address: impl Into<String>,
        source: Arc<dyn MetadataSource>,
        retriever: R,
    ) -> ConfigurationCacheBuilder<T>
    where
        R: ConfigurationRetriever<T> + 'static,
    {
        ConfigurationCacheBuilder {
            address: address.into(),
            source,
            retriever: Arc::new(retriever),
            validator: None,
            policy: RefreshPolicy::default(),
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    /// Metadata address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Refresh policy in effect
    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    /// Current configuration, refreshing first when it is due
    ///
    /// # Errors
    ///
    /// Fails only while no configuration has ever been fetched: with the error
    /// of the attempt made by this call, or with the last recorded error when
    /// the retry backoff has not elapsed yet.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn get_configuration(&self) -> ConfigResult<Arc<T>> {
        self.load(None, None).await
    }

    /// Like [`get_configuration`](Self::get_configuration) with a deadline
    ///
    /// A fetch that exceeds the deadline counts as a failed attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Timeout`] when the deadline elapses and no
    /// configuration is cached.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn get_configuration_with_timeout(&self, timeout: Duration) -> ConfigResult<Arc<T>> {
        self.load(Some(timeout), None).await
    }

    /// Like [`get_configuration`](Self::get_configuration), abandoned when
    /// `cancel` fires
    ///
    /// Cancellation leaves the cache untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Cancelled`] when cancelled and no configuration
    /// is cached.
    #[instrument(skip(self, cancel), fields(address = %self.address))]
    pub async fn get_configuration_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> ConfigResult<Arc<T>> {
        self.load(None, Some(cancel)).await
    }

    /// Mark the configuration stale
    ///
    /// The next call to [`get_configuration`](Self::get_configuration) fetches,
    /// subject to the minimum refresh interval.
    pub fn request_refresh(&self) {
        debug!(address = %self.address, "configuration refresh requested");
        self.refresh_requested.store(true, Ordering::Release);
    }

    /// Cached configuration without triggering a refresh
    pub fn current(&self) -> Option<Arc<T>> {
        self.state.read().current.clone()
    }

    /// Diagnostic snapshot
    pub fn status(&self) -> CacheStatus {
        self.state.read().status(Instant::now())
    }

    fn plan(&self) -> Plan<T> {
        let requested = self.refresh_requested.load(Ordering::Acquire);
        self.state.read().plan(&self.policy, requested, Instant::now())
    }

    async fn load(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> ConfigResult<Arc<T>> {
        match self.plan() {
            Plan::Serve(configuration) => return Ok(configuration),
            Plan::Fail(error) => return Err(error),
            Plan::Refresh(_) => {}
        }

        let deadline = timeout.map(|t| Instant::now() + t);

        let _gate = match self.refresh_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                if let Some(configuration) = self.current() {
                    debug!("refresh in flight, serving current configuration");
                    return Ok(configuration);
                }
                match bounded(self.refresh_gate.lock(), deadline, cancel).await {
                    Ok(gate) => gate,
                    Err(Interrupted::Timeout) => return Err(self.timeout_error(timeout)),
                    Err(Interrupted::Cancelled) => return Err(ConfigError::Cancelled),
                }
            }
        };

        // Another caller may have refreshed while we waited for the gate.
        match self.plan() {
            Plan::Serve(configuration) => Ok(configuration),
            Plan::Fail(error) => Err(error),
            Plan::Refresh(reason) => self.refresh(reason, timeout, deadline, cancel).await,
        }
    }

    async fn refresh(
        &self,
        reason: RefreshReason,
        timeout: Option<Duration>,
        deadline: Option<Instant>,
        cancel: Option<&CancellationToken>,
    ) -> ConfigResult<Arc<T>> {
        let started = Instant::now();
        let pending = PendingRequest::take(&self.refresh_requested);

        let attempt = async {
            let configuration = self
                .retriever
                .retrieve(&self.address, self.source.as_ref())
                .await?;
            if let Some(validator) = &self.validator {
                validator.validate(&configuration)?;
            }
            Ok(configuration)
        };

        let outcome = match bounded(attempt, deadline, cancel).await {
            Ok(outcome) => outcome,
            Err(Interrupted::Timeout) => Err(self.timeout_error(timeout)),
            Err(Interrupted::Cancelled) => {
                self.record(reason, Err(&ConfigError::Cancelled), started);
                debug!(reason = %reason, "configuration refresh cancelled");
                return self.current().ok_or(ConfigError::Cancelled);
            }
        };

        match outcome {
            Ok(configuration) => {
                let configuration = Arc::new(configuration);
                self.state
                    .write()
                    .commit(Arc::clone(&configuration), Instant::now());
                pending.consume();
                self.record(reason, Ok(()), started);
                info!(reason = %reason, "configuration refreshed");
                Ok(configuration)
            }
            Err(error) => {
                let (stale, failures) = {
                    let mut state = self.state.write();
                    state.record_failure(error.clone(), Instant::now());
                    (state.current.clone(), state.consecutive_failures)
                };
                self.record(reason, Err(&error), started);

                match stale {
                    Some(configuration) => {
                        warn!(
                            reason = %reason,
                            error = %error,
                            consecutive_failures = failures,
                            "configuration refresh failed, serving stale configuration"
                        );
                        Ok(configuration)
                    }
                    None => {
                        warn!(
                            reason = %reason,
                            error = %error,
                            consecutive_failures = failures,
                            "configuration refresh failed, no configuration available"
                        );
                        Err(error)
                    }
                }
            }
        }
    }

    fn record(&self, reason: RefreshReason, outcome: Result<(), &ConfigError>, started: Instant) {
        let status = match outcome {
            Ok(()) => RefreshStatus::Succeeded(reason),
            Err(error) => RefreshStatus::Failed {
                reason,
                error_type: error.error_type(),
            },
        };
        self.telemetry.record_refresh(&RefreshEvent {
            address: self.address.clone(),
            library: LIBRARY_ID,
            status,
            duration: started.elapsed(),
        });
    }

    fn timeout_error(&self, timeout: Option<Duration>) -> ConfigError {
        ConfigError::Timeout {
            address: self.address.clone(),
            timeout: timeout.unwrap_or_default(),
        }
    }
}

impl ConfigurationCache<OpenIdConfiguration> {
    /// Cache for an OpenID Connect discovery document and its key set
    ///
    /// Requires at least one signing key.
    pub fn openid_connect(address: impl Into<String>, source: Arc<dyn MetadataSource>) -> Self {
        Self::builder(address, source, OpenIdConnectRetriever)
            .validator(SigningKeyCountValidator::default())
            .build()
    }

    /// Cache for a bare JWKS document
    ///
    /// Requires at least one signing key.
    pub fn jwks(address: impl Into<String>, source: Arc<dyn MetadataSource>) -> Self {
        Self::builder(address, source, DocumentRetriever::new(JwksParser::new()))
            .validator(SigningKeyCountValidator::default())
            .build()
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> ConfigurationProvider<T> for ConfigurationCache<T> {
    async fn configuration(&self) -> ConfigResult<Arc<T>> {
        self.get_configuration().await
    }

    fn request_refresh(&self) {
        ConfigurationCache::request_refresh(self);
    }
}

/// Builder for [`ConfigurationCache`]
pub struct ConfigurationCacheBuilder<T> {
    address: String,
    source: Arc<dyn MetadataSource>,
    retriever: Arc<dyn ConfigurationRetriever<T>>,
    validator: Option<Arc<dyn ConfigurationValidator<T>>>,
    policy: RefreshPolicy,
    telemetry: Arc<dyn TelemetrySink>,
}

impl<T: Send + Sync + 'static> ConfigurationCacheBuilder<T> {
    /// Set the refresh policy
    pub fn policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Check every fetched configuration with `validator`
    pub fn validator<V>(mut self, validator: V) -> Self
    where
        V: ConfigurationValidator<T> + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Report refresh outcomes to `telemetry`
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Build the cache
    pub fn build(self) -> ConfigurationCache<T> {
        ConfigurationCache {
            address: self.address,
            source: self.source,
            retriever: self.retriever,
            validator: self.validator,
            policy: self.policy,
            telemetry: self.telemetry,
            state: RwLock::new(CacheState::default()),
            refresh_requested: AtomicBool::new(false),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }
}

/// A manual refresh request held by an in-flight refresh
///
/// The request goes back to the cache on drop unless the refresh committed,
/// so a failed, cancelled or abandoned fetch does not lose it.
struct PendingRequest<'a> {
    flag: &'a AtomicBool,
    requested: bool,
}

impl<'a> PendingRequest<'a> {
    fn take(flag: &'a AtomicBool) -> Self {
        Self {
            requested: flag.swap(false, Ordering::AcqRel),
            flag,
        }
    }

    fn consume(mut self) {
        self.requested = false;
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if self.requested {
            self.flag.store(true, Ordering::Release);
        }
    }
}

/// Await `future` until `deadline` or until `cancel` fires
async fn bounded<F: Future>(
    future: F,
    deadline: Option<Instant>,
    cancel: Option<&CancellationToken>,
) -> Result<F::Output, Interrupted> {
    let timed = async {
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, future)
                .await
                .map_err(|_| Interrupted::Timeout),
            None => Ok(future.await),
        }
    };

    match cancel {
        Some(token) => tokio::select! {
            biased;
            () = token.cancelled() => Err(Interrupted::Cancelled),
            result = timed => result,
        },
        None => timed.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticMetadataSource;
    use crate::telemetry::RecordingTelemetry;
    use crate::test_support::jwks_document;

    const ADDRESS: &str = "memory://jwks";

    fn cache_with(
        source: &Arc<StaticMetadataSource>,
        telemetry: &Arc<RecordingTelemetry>,
    ) -> ConfigurationCache<OpenIdConfiguration> {
        ConfigurationCache::builder(
            ADDRESS,
            Arc::clone(source) as Arc<dyn MetadataSource>,
            DocumentRetriever::new(JwksParser::new()),
        )
        .validator(SigningKeyCountValidator::default())
        .policy(
            RefreshPolicy::new(
                Duration::from_secs(3600),
                Duration::from_secs(60),
                Duration::from_secs(5),
            )
            .unwrap(),
        )
        .telemetry(Arc::clone(telemetry) as Arc<dyn TelemetrySink>)
        .build()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_fetches_then_serves_from_memory() {
        let source = Arc::new(StaticMetadataSource::with_document(
            ADDRESS,
            jwks_document(&["k1"]),
        ));
        let telemetry = Arc::new(RecordingTelemetry::new());
        let cache = cache_with(&source, &telemetry);

        let first = cache.get_configuration().await.unwrap();
        let second = cache.get_configuration().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(telemetry.refresh_tags(), vec!["first-refresh"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_automatic_refresh_after_interval() {
        let source = Arc::new(StaticMetadataSource::with_document(
            ADDRESS,
            jwks_document(&["k1"]),
        ));
        let telemetry = Arc::new(RecordingTelemetry::new());
        let cache = cache_with(&source, &telemetry);

        cache.get_configuration().await.unwrap();
        source.set_document(ADDRESS, jwks_document(&["k1", "k2"]));
        tokio::time::advance(Duration::from_secs(3600)).await;

        let refreshed = cache.get_configuration().await.unwrap();
        assert_eq!(refreshed.signing_keys.len(), 2);
        assert_eq!(telemetry.refresh_tags(), vec!["first-refresh", "automatic"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_first_fetch_leaves_state_untouched() {
        let source = Arc::new(StaticMetadataSource::with_document(
            ADDRESS,
            jwks_document(&["k1"]),
        ));
        source.set_delay(Some(Duration::from_secs(30)));
        let telemetry = Arc::new(RecordingTelemetry::new());
        let cache = cache_with(&source, &telemetry);

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let err = cache.get_configuration_cancellable(&token).await.unwrap_err();
        assert_eq!(err, ConfigError::Cancelled);

        let status = cache.status();
        assert!(!status.has_configuration);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.since_last_attempt, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let source = Arc::new(StaticMetadataSource::with_document(
            ADDRESS,
            jwks_document(&["k1"]),
        ));
        source.set_delay(Some(Duration::from_secs(30)));
        let telemetry = Arc::new(RecordingTelemetry::new());
        let cache = cache_with(&source, &telemetry);

        let err = cache
            .get_configuration_with_timeout(Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Timeout { .. }));
        assert_eq!(cache.status().consecutive_failures, 1);
        assert_eq!(telemetry.refresh_tags(), vec!["failure:timeout"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_fetch() {
        let source = Arc::new(StaticMetadataSource::with_document(
            ADDRESS,
            jwks_document(&["k1"]),
        ));
        source.set_delay(Some(Duration::from_millis(100)));
        let telemetry = Arc::new(RecordingTelemetry::new());
        let cache = Arc::new(cache_with(&source, &telemetry));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_configuration().await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_suppresses_retries_without_configuration() {
        let source = Arc::new(StaticMetadataSource::new());
        source.set_failure(ADDRESS, ConfigError::fetch(ADDRESS, "connection refused"));
        let telemetry = Arc::new(RecordingTelemetry::new());
        let cache = cache_with(&source, &telemetry);

        assert!(cache.get_configuration().await.is_err());
        // within the 5s backoff the recorded error is returned without I/O
        assert!(cache.get_configuration().await.is_err());
        assert_eq!(source.fetch_count(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.get_configuration().await.is_err());
        assert_eq!(source.fetch_count(), 2);

        // second failure doubles the backoff
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.get_configuration().await.is_err());
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_static_configuration_provider() {
        let provider = StaticConfiguration::new(5u8);
        provider.request_refresh();
        assert_eq!(*provider.configuration().await.unwrap(), 5);
    }
}
