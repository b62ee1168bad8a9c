//! Bounded retry with classified failures.
//!
//! Every tile fetch walks a small state machine:
//!
//! ```text
//! Pending ──▶ Attempting(1) ──ok──────────────────────▶ Succeeded
//!                  │
//!                  ├──transient, budget left──▶ Backoff(1, d) ──▶ Attempting(2) ...
//!                  │
//!                  └──permanent or exhausted──▶ Failed
//! ```
//!
//! The policy only decides transitions; the operation being retried is
//! supplied by the caller, so the same machinery drives HTTP and test
//! transports alike.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::IoError;

/// Default number of attempts per tile, first try included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay before the second attempt; doubled for every further attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

// =============================================================================
// State Machine
// =============================================================================

/// Position of a single fetch in the retry state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Not started yet
    Pending,

    /// Attempt `n` (1-based) is in flight
    Attempting(u32),

    /// Attempt `attempt` failed transiently; wait `delay` before the next one
    Backoff { attempt: u32, delay: Duration },

    /// Succeeded on the given attempt
    Succeeded(u32),

    /// Gave up after the given number of attempts
    Failed(u32),
}

impl RetryState {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryState::Succeeded(_) | RetryState::Failed(_))
    }

    /// Move from a waiting state to the next attempt.
    ///
    /// `Attempting` and terminal states are returned unchanged.
    pub fn resume(self) -> RetryState {
        match self {
            RetryState::Pending => RetryState::Attempting(1),
            RetryState::Backoff { attempt, .. } => RetryState::Attempting(attempt + 1),
            other => other,
        }
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Retry budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, at least 1
    pub max_attempts: u32,

    /// Delay after the first failed attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

/// Final outcome of a retried operation.
#[derive(Debug)]
pub struct Attempted<T> {
    pub outcome: Result<T, IoError>,

    /// Number of attempts made, at least 1
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff after failed attempt `attempt`: `base * 2^(attempt - 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }

    /// Transition out of `Attempting(attempt)` given its outcome.
    pub fn transition(&self, attempt: u32, error: Option<&IoError>) -> RetryState {
        match error {
            None => RetryState::Succeeded(attempt),
            Some(error) if error.is_transient() && attempt < self.max_attempts => {
                RetryState::Backoff {
                    attempt,
                    delay: self.delay_for(attempt),
                }
            }
            Some(_) => RetryState::Failed(attempt),
        }
    }

    /// Drive `operation` through the state machine until it settles.
    ///
    /// The operation receives the 1-based attempt number.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, IoError>>,
    {
        let mut state = RetryState::Pending;
        loop {
            match state {
                RetryState::Attempting(attempt) => {
                    let result = operation(attempt).await;
                    let next = self.transition(attempt, result.as_ref().err());
                    if next.is_terminal() {
                        return Attempted {
                            outcome: result,
                            attempts: attempt,
                        };
                    }
                    if let (RetryState::Backoff { delay, .. }, Err(error)) = (&next, &result) {
                        debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Transient failure, backing off"
                        );
                    }
                    state = next;
                }
                RetryState::Backoff { delay, .. } => {
                    tokio::time::sleep(delay).await;
                    state = state.resume();
                }
                _ => state = state.resume(),
            }
        }
    }
}
