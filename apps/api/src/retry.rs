//! Shared retry policy: bounded attempts, linear backoff, and a per-error
//! decision on whether another attempt is worthwhile.
//!
//! Used by the generation invoker and the content store writer.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Classifies an error as worth retrying.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// A non-transient error; returned without further attempts.
    Fatal { attempt: u32, error: E },
    /// Every attempt failed with a transient error.
    Exhausted { attempts: u32, last: E },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// `attempt` is 1-based: the attempt that just failed.
    pub fn should_retry<E: Transient>(&self, attempt: u32, error: &E) -> bool {
        attempt < self.max_attempts && error.is_transient()
    }

    /// Delay before the attempt after `attempt`: base, 2×base, 3×base, …
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Runs `op` until it succeeds, fails fatally, or attempts run out.
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        E: Transient + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if self.should_retry(attempt, &error) => {
                    let delay = self.delay(attempt);
                    warn!(
                        "{label} attempt {attempt}/{} failed: {error}; retrying after {}ms",
                        self.max_attempts,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) if error.is_transient() => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    })
                }
                Err(error) => return Err(RetryError::Fatal { attempt, error }),
            }
        }
    }
}
