//! Retry utilities with exponential backoff.
//!
//! One policy type drives every retry loop in the workspace: single-operation
//! retries through [`retry_with_backoff`] and pass-level retries where the
//! caller only needs [`RetryPolicy::delay_after`].

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for retry behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubled after each further one.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Whether to add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    /// One initial attempt plus exactly one retry.
    pub fn single_retry(delay: Duration) -> Self {
        Self::new(2, delay)
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Attempts actually made; a zero budget still runs the operation once.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after failed attempt `attempt` (1-based):
    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if self.jitter && !delay.is_zero() {
            let jitter = delay.mul_f64(0.25 * rand::thread_rng().gen_range(0.0..1.0));
            delay + jitter
        } else {
            delay
        }
    }
}

/// Outcome of one try, kept so callers can report what happened.
#[derive(Clone, Debug)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    /// How long the attempt itself ran.
    pub latency: Duration,
    /// Error message when the attempt failed.
    pub error: Option<String>,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Successful result and the attempts it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: Vec<AttemptRecord>,
}

/// Every attempt failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub last_error: E,
    pub attempts: Vec<AttemptRecord>,
}

/// Run `f` until it succeeds or the policy's attempt budget is spent, sleeping
/// [`RetryPolicy::delay_after`] between attempts. Every error consumes a slot;
/// there is no permanent/transient distinction.
///
/// `f` receives the 1-based attempt number.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut f: F,
) -> Result<Retried<T>, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.attempts();
    let mut attempts = Vec::with_capacity(max_attempts as usize);
    let mut attempt = 1;

    loop {
        let started = Instant::now();
        match f(attempt).await {
            Ok(value) => {
                attempts.push(AttemptRecord {
                    attempt,
                    latency: started.elapsed(),
                    error: None,
                });
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(Retried { value, attempts });
            }
            Err(err) => {
                attempts.push(AttemptRecord {
                    attempt,
                    latency: started.elapsed(),
                    error: Some(err.to_string()),
                });

                if attempt >= max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Operation failed after max attempts"
                    );
                    return Err(Exhausted {
                        last_error: err,
                        attempts,
                    });
                }

                let backoff = policy.delay_after(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    error = %err,
                    backoff_ms = backoff.as_millis() as u64,
                    "Operation failed, retrying after backoff"
                );

                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
