//! Client-wide defaults

use crate::retry::RetryPolicy;
use std::time::Duration;

/// Default delay before the first attempt
pub const DEFAULT_DELAY: Duration = Duration::from_millis(1_000);

/// Default response timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default redirect limit (effectively "follow all")
pub const DEFAULT_MAX_REDIRECTIONS: usize = 999;

/// Default response encoding label
pub const DEFAULT_ENCODING: &str = "utf8";

/// Defaults applied when a call leaves an option unset
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Delay before the first attempt
    pub default_delay: Duration,
    /// Retry policy, also the base for `RetryOption::Count`
    pub default_retry: RetryPolicy,
    /// Response timeout
    pub default_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_delay: DEFAULT_DELAY,
            default_retry: RetryPolicy::default(),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Test mode: no initial delay and fast, deterministic retries
    pub fn testing() -> Self {
        Self {
            default_delay: Duration::ZERO,
            default_retry: RetryPolicy::new(3)
                .with_min_timeout(Duration::from_millis(1))
                .with_randomize(false),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}
