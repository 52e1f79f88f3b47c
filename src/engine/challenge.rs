//! Helpers for antibot challenge collaborators.
//!
//! Both helpers observe the run's cancellation token at every iteration, the
//! same way the step executor does.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error_handling::ChallengeError;

use super::cancel::sleep_or_cancel;

/// Result of one verification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification<T> {
    /// The challenge was accepted
    Valid(T),
    /// The validator rejected the result; start over
    Invalid(String),
}

/// Polls an external solver until it yields a token.
///
/// `poll` receives the 1-based poll number and returns `Ok(None)` while the
/// solution is pending. `max_polls == 0` polls until cancelled.
pub async fn poll_for_token<F, Fut>(
    cancel: &CancellationToken,
    interval: Duration,
    max_polls: u32,
    mut poll: F,
) -> Result<String, ChallengeError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<Option<String>>>,
{
    let mut polls = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(ChallengeError::Cancelled);
        }
        polls += 1;
        if let Some(token) = poll(polls).await? {
            log::debug!("Challenge token ready after {polls} polls");
            return Ok(token);
        }
        if max_polls != 0 && polls >= max_polls {
            return Err(ChallengeError::Exhausted { attempts: polls });
        }
        if !sleep_or_cancel(cancel, interval).await {
            return Err(ChallengeError::Cancelled);
        }
    }
}

/// Re-runs a whole verification flow until it validates, at most `max_attempts` times.
pub async fn verify_with_retries<T, F, Fut>(
    cancel: &CancellationToken,
    max_attempts: u32,
    mut verify: F,
) -> Result<T, ChallengeError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<Verification<T>>>,
{
    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(ChallengeError::Cancelled);
        }
        match verify(attempt).await? {
            Verification::Valid(value) => return Ok(value),
            Verification::Invalid(reason) => {
                log::warn!("Challenge verification {attempt}/{max_attempts} rejected: {reason}");
            }
        }
    }
    Err(ChallengeError::Exhausted {
        attempts: max_attempts,
    })
}
