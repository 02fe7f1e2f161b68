//! Bounded retry with exponential backoff
//!
//! [`retry`] drives an async operation until it succeeds, aborts, or the
//! policy runs out of attempts. The operation signals an abort by returning
//! [`RetryError::Abort`]; any other failure is retried.

use rand::Rng;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Callback fired before each retried attempt with the failure and its attempt number
pub type OnRetry = Arc<dyn Fn(&(dyn StdError + 'static), u32) + Send + Sync>;

/// Retry policy
#[derive(Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub retries: u32,
    /// Exponential growth factor
    pub factor: f64,
    /// Delay before the first retry
    pub min_timeout: Duration,
    /// Upper bound for a single delay, unbounded when `None`
    pub max_timeout: Option<Duration>,
    /// Multiply delays by a random factor in `[1, 2)`; unset means true
    pub randomize: Option<bool>,
    /// Fired before each retried attempt
    pub on_retry: Option<OnRetry>,
    /// Response statuses that end the retry loop immediately
    pub abort_on_status: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            factor: 2.0,
            min_timeout: Duration::from_millis(1_000),
            max_timeout: None,
            randomize: None,
            on_retry: None,
            abort_on_status: Vec::new(),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("retries", &self.retries)
            .field("factor", &self.factor)
            .field("min_timeout", &self.min_timeout)
            .field("max_timeout", &self.max_timeout)
            .field("randomize", &self.randomize)
            .field("on_retry", &self.on_retry.is_some())
            .field("abort_on_status", &self.abort_on_status)
            .finish()
    }
}

impl RetryPolicy {
    /// Policy with the given number of retries and default backoff
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            ..Default::default()
        }
    }

    /// Policy making exactly one attempt
    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Set the number of retries
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the growth factor
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Set the first retry delay
    pub fn with_min_timeout(mut self, timeout: Duration) -> Self {
        self.min_timeout = timeout;
        self
    }

    /// Cap a single delay
    pub fn with_max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = Some(timeout);
        self
    }

    /// Enable or disable jitter
    pub fn with_randomize(mut self, randomize: bool) -> Self {
        self.randomize = Some(randomize);
        self
    }

    /// Register a callback fired before each retry
    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(&(dyn StdError + 'static), u32) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    /// Statuses that abort without retrying
    pub fn abort_on_status(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.abort_on_status = statuses.into_iter().collect();
        self
    }

    /// Whether a failing status should end the loop
    pub fn aborts_on(&self, status: u16) -> bool {
        self.abort_on_status.contains(&status)
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let random = if self.randomize.unwrap_or(true) {
            rand::thread_rng().gen_range(1.0..2.0)
        } else {
            1.0
        };
        let exponent = retry.saturating_sub(1) as i32;
        let millis =
            (random * self.min_timeout.as_millis() as f64 * self.factor.powi(exponent)).round();
        let delay = if millis.is_finite() && millis < u64::MAX as f64 {
            Duration::from_millis(millis.max(0.0) as u64)
        } else {
            Duration::MAX
        };
        match self.max_timeout {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// Failure of a single attempt
#[derive(Debug)]
pub enum RetryError<E> {
    /// Retry if the policy allows
    Transient(E),
    /// Stop immediately and return this error
    Abort(E),
}

impl<E> RetryError<E> {
    /// The wrapped error
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Transient(err) | RetryError::Abort(err) => err,
        }
    }
}

impl<E> From<E> for RetryError<E> {
    fn from(err: E) -> Self {
        RetryError::Transient(err)
    }
}

/// Run `operation` until it succeeds, aborts, or the policy is exhausted
///
/// The operation receives the attempt number, starting at 1. On exhaustion the
/// last error is returned.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    E: StdError + 'static,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RetryError<E>>>,
{
    let mut attempt: u32 = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(RetryError::Abort(err)) => {
                debug!(attempt, error = %err, "Retry aborted");
                return Err(err);
            }
            Err(RetryError::Transient(err)) => {
                if attempt > policy.retries {
                    debug!(attempt, error = %err, "Retries exhausted");
                    return Err(err);
                }
                if let Some(on_retry) = &policy.on_retry {
                    on_retry(&err, attempt);
                }
                let delay = policy.backoff(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
