//! Bounded retry of a single fallible operation
//!
//! Attempts run back to back: pacing is left to the transport's own timeouts
//! and to the caller. The executor does not deduplicate, so `operation` must
//! be safe to repeat (idempotent or self-resetting).

use core::fmt;
use core::future::Future;

use tracing::{debug, warn};

use crate::errors::RetryError;

/// Classifies an error as worth another attempt
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Run `operation` up to `max_attempts` times
///
/// Returns the first success. A non-retryable error stops immediately with
/// [`RetryError::Terminal`]; otherwise the error of the final attempt is
/// returned as [`RetryError::RetriesExhausted`]. A budget of zero still makes
/// one attempt.
pub async fn execute<T, E, F, Fut>(max_attempts: u32, mut operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Operation succeeded on attempt {}/{}", attempt, max_attempts);
                }
                return Ok(value);
            }
            Err(error) if !error.is_retryable() => {
                debug!("Operation failed terminally on attempt {}: {}", attempt, error);
                return Err(RetryError::Terminal(error));
            }
            Err(error) if attempt >= max_attempts => {
                warn!("Operation failed after {} attempts: {}", attempt, error);
                return Err(RetryError::RetriesExhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }
            Err(error) => {
                debug!("Attempt {}/{} failed, retrying: {}", attempt, max_attempts, error);
            }
        }
    }
}
