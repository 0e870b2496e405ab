use crate::shutdown::ShutdownSignal;
use crate::source::{DataSource, SourceError};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_multiplier() -> u32 {
    2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms,
            max_backoff_ms,
            multiplier: default_multiplier(),
        }
    }

    /// Attempt budget, never below one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (1-based), capped at `max_backoff_ms`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(exponent);
        let delay = self.initial_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

/// Sleep hook so callers can run retry loops without wall-clock waits.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Outcome of an exhausted or aborted retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: SourceError },
    #[error("permanent failure: {0}")]
    Permanent(SourceError),
    #[error("shutdown requested")]
    Cancelled,
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Permanent(_) => 1,
            RetryError::Cancelled => 0,
        }
    }
}

/// Runs `op` until it succeeds, fails permanently, the budget runs out or
/// shutdown is requested. `on_retry` observes each transient failure.
pub fn retry_with_backoff<T, F, R>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    shutdown: &ShutdownSignal,
    mut op: F,
    mut on_retry: R,
) -> Result<T, RetryError>
where
    F: FnMut() -> Result<T, SourceError>,
    R: FnMut(u32, &SourceError),
{
    let attempts = policy.attempts();
    let mut attempt = 0;
    loop {
        if shutdown.is_requested() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(RetryError::Permanent(err)),
            Err(err) if attempt >= attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                })
            }
            Err(err) => {
                on_retry(attempt, &err);
                let delay = policy.backoff(attempt);
                warn!(attempt, ?delay, error = %err, "transient fetch failure, backing off");
                sleeper.sleep(delay);
            }
        }
    }
}

/// Fetches the unit at `cursor` from any [`DataSource`] with bounded backoff.
pub fn fetch_with_retry<S: DataSource + ?Sized>(
    source: &S,
    cursor: u64,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    shutdown: &ShutdownSignal,
) -> Result<S::Item, RetryError> {
    retry_with_backoff(
        policy,
        sleeper,
        shutdown,
        || source.fetch_next(cursor),
        |_, _| {},
    )
}

/// Reads the head cursor of any [`DataSource`] with bounded backoff.
pub fn head_with_retry<S: DataSource + ?Sized>(
    source: &S,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    shutdown: &ShutdownSignal,
) -> Result<u64, RetryError> {
    retry_with_backoff(policy, sleeper, shutdown, || source.current_head(), |_, _| {})
}
