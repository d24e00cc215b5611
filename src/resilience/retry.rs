//! Fixed-backoff retry loop

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// How often and how far apart an operation is attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed; `None` retries forever
    pub max_attempts: Option<u32>,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(20),
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff,
        }
    }

    pub fn unlimited(backoff: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff,
        }
    }

    /// Policy from a signed retry count, where any negative value means unlimited
    pub fn from_max_retries(max_retries: i64, backoff: Duration) -> Self {
        match u32::try_from(max_retries) {
            Ok(max) => Self::new(max, backoff),
            Err(_) if max_retries < 0 => Self::unlimited(backoff),
            Err(_) => Self::new(u32::MAX, backoff),
        }
    }
}

/// Outcome of one failed attempt
#[derive(Debug)]
pub enum Attempt<E> {
    /// Try again after the backoff
    Retry(E),
    /// Stop now
    Abort(E),
}

/// Why [`retry`] gave up
#[derive(Debug, Error)]
pub enum RetryError<E: Display> {
    #[error("max retries reached after {attempts} attempts: {last_error}")]
    MaxRetriesReached { attempts: u32, last_error: E },

    #[error("retry aborted: {0}")]
    Aborted(E),
}

impl<E: Display> RetryError<E> {
    pub fn is_max_retries(&self) -> bool {
        matches!(self, Self::MaxRetriesReached { .. })
    }

    /// The error of the last attempt
    pub fn into_inner(self) -> E {
        match self {
            Self::MaxRetriesReached { last_error, .. } => last_error,
            Self::Aborted(e) => e,
        }
    }
}

/// Run `operation` until it succeeds, aborts, or the policy runs out
///
/// The closure receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Attempt<E>>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(Attempt::Abort(e)) => return Err(RetryError::Aborted(e)),
            Err(Attempt::Retry(e)) => {
                if policy.max_attempts.is_some_and(|max| attempt >= max) {
                    return Err(RetryError::MaxRetriesReached {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                debug!(
                    attempt = attempt,
                    backoff_ms = policy.backoff.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(policy.backoff).await;
            }
        }
    }
}
