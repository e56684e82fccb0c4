//! Refresh policy

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Default proactive refresh period (12 hours)
pub const DEFAULT_AUTOMATIC_REFRESH_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Default floor between fetch attempts (5 minutes)
pub const DEFAULT_MINIMUM_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default delay after the first failed fetch (5 seconds)
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// When a cache refreshes and how it backs off after failures
///
/// ```
/// use std::time::Duration;
/// use fedtrust::cache::RefreshPolicy;
///
/// let policy = RefreshPolicy::new(
///     Duration::from_secs(3600),
///     Duration::from_secs(60),
///     Duration::from_secs(2),
/// )?;
/// assert_eq!(policy.backoff_after(3), Duration::from_secs(8));
/// # Ok::<(), fedtrust::PolicyError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RefreshPolicyConfig", into = "RefreshPolicyConfig")]
pub struct RefreshPolicy {
    automatic_refresh_interval: Duration,
    minimum_refresh_interval: Duration,
    retry_backoff: Duration,
}

impl RefreshPolicy {
    /// Build a policy
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] when the automatic interval is zero or shorter
    /// than the minimum interval.
    pub fn new(
        automatic_refresh_interval: Duration,
        minimum_refresh_interval: Duration,
        retry_backoff: Duration,
    ) -> Result<Self, PolicyError> {
        if automatic_refresh_interval.is_zero() {
            return Err(PolicyError::ZeroAutomaticInterval);
        }
        if minimum_refresh_interval > automatic_refresh_interval {
            return Err(PolicyError::MinimumExceedsAutomatic {
                minimum: minimum_refresh_interval,
                automatic: automatic_refresh_interval,
            });
        }
        Ok(Self {
            automatic_refresh_interval,
            minimum_refresh_interval,
            retry_backoff,
        })
    }

    /// How long a configuration is served before a proactive refresh
    pub fn automatic_refresh_interval(&self) -> Duration {
        self.automatic_refresh_interval
    }

    /// Floor between two fetch attempts once a configuration is cached
    pub fn minimum_refresh_interval(&self) -> Duration {
        self.minimum_refresh_interval
    }

    /// Delay after the first failed attempt
    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }

    /// Delay required after `failures` consecutive failed attempts
    ///
    /// Doubles per failure starting at the retry backoff, capped at the
    /// automatic refresh interval. Zero when there were no failures.
    pub fn backoff_after(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.retry_backoff
            .checked_mul(factor)
            .map_or(self.automatic_refresh_interval, |d| {
                d.min(self.automatic_refresh_interval)
            })
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            automatic_refresh_interval: DEFAULT_AUTOMATIC_REFRESH_INTERVAL,
            minimum_refresh_interval: DEFAULT_MINIMUM_REFRESH_INTERVAL,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Serialized form of [`RefreshPolicy`], durations in whole seconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RefreshPolicyConfig {
    /// Automatic refresh interval in seconds
    #[serde(default = "default_automatic_secs")]
    pub automatic_refresh_interval_secs: u64,
    /// Minimum refresh interval in seconds
    #[serde(default = "default_minimum_secs")]
    pub minimum_refresh_interval_secs: u64,
    /// Retry backoff in seconds
    #[serde(default = "default_backoff_secs")]
    pub retry_backoff_secs: u64,
}

fn default_automatic_secs() -> u64 {
    DEFAULT_AUTOMATIC_REFRESH_INTERVAL.as_secs()
}

fn default_minimum_secs() -> u64 {
    DEFAULT_MINIMUM_REFRESH_INTERVAL.as_secs()
}

fn default_backoff_secs() -> u64 {
    DEFAULT_RETRY_BACKOFF.as_secs()
}

impl TryFrom<RefreshPolicyConfig> for RefreshPolicy {
    type Error = PolicyError;

    fn try_from(config: RefreshPolicyConfig) -> Result<Self, Self::Error> {
        Self::new(
            Duration::from_secs(config.automatic_refresh_interval_secs),
            Duration::from_secs(config.minimum_refresh_interval_secs),
            Duration::from_secs(config.retry_backoff_secs),
        )
    }
}

impl From<RefreshPolicy> for RefreshPolicyConfig {
    fn from(policy: RefreshPolicy) -> Self {
        Self {
            automatic_refresh_interval_secs: policy.automatic_refresh_interval.as_secs(),
            minimum_refresh_interval_secs: policy.minimum_refresh_interval.as_secs(),
            retry_backoff_secs: policy.retry_backoff.as_secs(),
        }
    }
}
