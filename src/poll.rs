//! Bounded polling of provider-side state transitions.
//!
//! Every wait in the pipelines goes through [`poll`]: a fixed interval, a
//! fixed attempt budget, and a check that either yields a value or asks to
//! keep waiting. Exhausting the budget is an ordinary outcome, not an
//! error; callers decide what a timeout means for their stage.

use std::future::Future;
use std::time::Duration;

/// Result of a bounded poll.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollOutcome<T> {
    /// The awaited condition held within the attempt budget.
    Ready {
        /// Value produced by the successful check.
        value: T,
        /// Number of checks performed, including the successful one.
        attempts: u32,
    },
    /// The attempt budget was exhausted without the condition holding.
    TimedOut {
        /// Number of checks performed.
        attempts: u32,
    },
}

impl<T> PollOutcome<T> {
    /// Returns the ready value, or `None` on timeout.
    pub fn into_ready(self) -> Option<T> {
        match self {
            Self::Ready { value, .. } => Some(value),
            Self::TimedOut { .. } => None,
        }
    }
}

/// Polls `check` up to `max_attempts` times, sleeping `interval` between
/// attempts. The first check runs immediately.
///
/// `check` returns `Ok(Some(value))` when the condition holds, `Ok(None)`
/// to keep waiting, or `Err` to abort the poll entirely.
///
/// # Errors
///
/// Propagates the first error returned by `check`.
pub async fn poll<T, E, F, Fut>(
    interval: Duration,
    max_attempts: u32,
    mut check: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for attempt in 1..=max_attempts {
        if let Some(value) = check().await? {
            return Ok(PollOutcome::Ready {
                value,
                attempts: attempt,
            });
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Ok(PollOutcome::TimedOut {
        attempts: max_attempts,
    })
}
