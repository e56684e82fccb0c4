//! Cache state and refresh planning

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::RefreshPolicy;
use crate::error::ConfigError;
use crate::telemetry::RefreshReason;

/// Mutable record behind a configuration cache
#[derive(Debug)]
pub(crate) struct CacheState<T> {
    pub(crate) current: Option<Arc<T>>,
    pub(crate) last_successful_fetch: Option<Instant>,
    pub(crate) last_attempt: Option<Instant>,
    pub(crate) consecutive_failures: u32,
    pub(crate) last_error: Option<ConfigError>,
}

impl<T> Default for CacheState<T> {
    fn default() -> Self {
        Self {
            current: None,
            last_successful_fetch: None,
            last_attempt: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// What a caller should do with the state it observed
#[derive(Debug)]
pub(crate) enum Plan<T> {
    /// Return the cached configuration as is
    Serve(Arc<T>),
    /// Fetch, for the given reason
    Refresh(RefreshReason),
    /// Nothing cached and a retry is not allowed yet
    Fail(ConfigError),
}

impl<T> CacheState<T> {
    /// Decide between serving, refreshing and failing at `now`
    pub(crate) fn plan(
        &self,
        policy: &RefreshPolicy,
        refresh_requested: bool,
        now: Instant,
    ) -> Plan<T> {
        let since_attempt = self
            .last_attempt
            .map(|at| now.saturating_duration_since(at));
        let backoff = policy.backoff_after(self.consecutive_failures);

        let Some(current) = &self.current else {
            return match (since_attempt, &self.last_error) {
                (Some(elapsed), Some(error)) if elapsed < backoff => Plan::Fail(error.clone()),
                _ => Plan::Refresh(RefreshReason::FirstRefresh),
            };
        };

        let expired = self.last_successful_fetch.is_none_or(|at| {
            now.saturating_duration_since(at) >= policy.automatic_refresh_interval()
        });
        if !expired && !refresh_requested {
            return Plan::Serve(Arc::clone(current));
        }

        let floor = policy.minimum_refresh_interval().max(backoff);
        if since_attempt.is_some_and(|elapsed| elapsed < floor) {
            return Plan::Serve(Arc::clone(current));
        }

        Plan::Refresh(if refresh_requested {
            RefreshReason::Manual
        } else {
            RefreshReason::Automatic
        })
    }

    pub(crate) fn commit(&mut self, configuration: Arc<T>, now: Instant) {
        self.current = Some(configuration);
        self.last_successful_fetch = Some(now);
        self.last_attempt = Some(now);
        self.consecutive_failures = 0;
        self.last_error = None;
    }

    pub(crate) fn record_failure(&mut self, error: ConfigError, now: Instant) {
        self.last_attempt = Some(now);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error);
    }

    pub(crate) fn status(&self, now: Instant) -> CacheStatus {
        CacheStatus {
            has_configuration: self.current.is_some(),
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.as_ref().map(ConfigError::error_type),
            since_last_success: self
                .last_successful_fetch
                .map(|at| now.saturating_duration_since(at)),
            since_last_attempt: self
                .last_attempt
                .map(|at| now.saturating_duration_since(at)),
        }
    }
}

/// Diagnostic snapshot of a cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
    /// Whether a configuration has ever been fetched
    pub has_configuration: bool,
    /// Failed attempts since the last success
    pub consecutive_failures: u32,
    /// Error class of the last failure, cleared on success
    pub last_error: Option<&'static str>,
    /// Age of the cached configuration
    pub since_last_success: Option<Duration>,
    /// Time since the last fetch attempt
    pub since_last_attempt: Option<Duration>,
}
