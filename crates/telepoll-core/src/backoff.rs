//! Failure cooldown policy for the poll loop.

use std::time::Duration;

use crate::Error;

/// How the loop waits after a failed fetch that is not a poller conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryBackoff {
    /// Retry on the next iteration with no delay.
    Immediate,
    /// Double the delay after each consecutive failure, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed wait after "terminated by other long poll" style conflicts.
    pub conflict_cooldown: Duration,
    pub backoff: RetryBackoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            conflict_cooldown: Duration::from_secs(5),
            backoff: RetryBackoff::Exponential {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(60),
            },
        }
    }
}

/// Mutable retry state owned by one poll loop.
#[derive(Debug)]
pub struct BackoffState {
    policy: RetryPolicy,
    next_delay: Option<Duration>,
}

impl BackoffState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            next_delay: None,
        }
    }

    /// Delay to apply before the next fetch, if any.
    ///
    /// Conflicts always yield the configured cooldown and leave the exponential
    /// sequence untouched.
    pub fn on_failure(&mut self, err: &Error) -> Option<Duration> {
        if err.is_poll_conflict() {
            return Some(self.policy.conflict_cooldown).filter(|d| !d.is_zero());
        }

        match self.policy.backoff {
            RetryBackoff::Immediate => None,
            RetryBackoff::Exponential { initial, max } => {
                let delay = self.next_delay.unwrap_or(initial).min(max);
                self.next_delay = Some(delay.saturating_mul(2).min(max));
                Some(delay).filter(|d| !d.is_zero())
            }
        }
    }

    pub fn on_success(&mut self) {
        self.next_delay = None;
    }
}
