//! Retry with exponential backoff and jitter
//!
//! Delays are a pure function of the attempt number and a jitter sample,
//! and the loop takes its sleep function as a parameter, so the schedule
//! can be checked in tests without waiting on a real clock.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each further failure
    pub base_delay: Duration,
    /// Upper bound on the random extra delay added to each wait
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Wait before the attempt following failed attempt number `attempt`
    /// (0-based). `jitter_fraction` is clamped into [0, 1].
    pub fn delay_for(&self, attempt: u32, jitter_fraction: f64) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let backoff = self.base_delay.saturating_mul(factor);
        let jitter = self.max_jitter.mul_f64(jitter_fraction.clamp(0.0, 1.0));
        backoff.saturating_add(jitter)
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    Exhausted { attempts: u32, last: E },
    /// A non-retryable failure; returned without further attempts
    Aborted(E),
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempts: {}", attempts, last)
            }
            RetryError::Aborted(e) => write!(f, "{}", e),
        }
    }
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted(e) => e,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are spent. `op` receives the 0-based attempt number.
pub async fn retry_with<T, E, Op, Fut, Sleep, SleepFut>(
    policy: &RetryPolicy,
    mut sleep: Sleep,
    mut op: Op,
) -> Result<T, RetryError<E>>
where
    E: Retryable + Display,
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Sleep: FnMut(Duration) -> SleepFut,
    SleepFut: Future<Output = ()>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("Request succeeded after {} retries", attempt);
                }
                return Ok(value);
            }
            Err(error) if !error.is_retryable() => {
                tracing::error!("Request failed (non-retryable): {}", error);
                return Err(RetryError::Aborted(error));
            }
            Err(error) => {
                if attempt + 1 >= max_attempts {
                    tracing::error!(
                        "Request failed after {} attempts: {}",
                        attempt + 1,
                        error
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        last: error,
                    });
                }

                let delay = policy.delay_for(attempt, rand::random::<f64>());
                tracing::warn!(
                    "Retry attempt {} failed, retrying in {:?}: {}",
                    attempt + 1,
                    delay,
                    error
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// [`retry_with`] on the tokio clock
pub async fn retry<T, E, Op, Fut>(policy: &RetryPolicy, op: Op) -> Result<T, RetryError<E>>
where
    E: Retryable + Display,
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with(policy, tokio::time::sleep, op).await
}
