//! Retry policy with exponential backoff
//!
//! A pure decision function consulted by download workers and the listing
//! walker on failure. The policy never sleeps or performs I/O itself; callers
//! apply the returned delay. Exponential backoff with optional jitter
//! prevents thundering herd against a struggling remote.

use crate::config::RetryConfig;
use crate::error::{DownloadFailure, FailureKind};
use rand::Rng;
use std::time::Duration;

/// Outcome of consulting the retry policy after a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after waiting at least this long
    Retry(Duration),
    /// Stop retrying; record the failure as permanent for this run
    GiveUp,
}

impl RetryDecision {
    /// The delay, if this decision is a retry
    pub fn delay(&self) -> Option<Duration> {
        match self {
            RetryDecision::Retry(d) => Some(*d),
            RetryDecision::GiveUp => None,
        }
    }
}

/// Pure retry/backoff decision function
///
/// Retryable kinds: [`FailureKind::TransientNetwork`],
/// [`FailureKind::RateLimited`] (honoring a server Retry-After hint when
/// present), [`FailureKind::IntegrityFailure`] (may be a corrupted transfer)
/// and [`FailureKind::Storage`]. [`FailureKind::PermanentRemote`] and
/// [`FailureKind::Cancelled`] always yield `GiveUp`.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from the retry configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Maximum attempts this policy allows per unit of work
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Decide whether to retry after a failed attempt
    ///
    /// `attempt` is the 1-based number of the attempt that just failed; the
    /// first failure is attempt 1. Once `attempt` reaches the configured
    /// maximum the decision is `GiveUp` regardless of kind.
    pub fn decide(&self, failure: &DownloadFailure, attempt: u32) -> RetryDecision {
        if !Self::is_retryable(failure.kind) {
            return RetryDecision::GiveUp;
        }
        if attempt >= self.config.max_attempts {
            return RetryDecision::GiveUp;
        }

        // A server Retry-After hint overrides computed backoff, still bounded
        // by the configured cap.
        if let Some(hint) = failure.retry_after {
            return RetryDecision::Retry(hint.min(self.config.max_delay));
        }

        RetryDecision::Retry(self.backoff_delay(attempt))
    }

    /// Whether a failure kind is worth retrying at all
    pub fn is_retryable(kind: FailureKind) -> bool {
        match kind {
            FailureKind::TransientNetwork
            | FailureKind::RateLimited
            | FailureKind::IntegrityFailure
            | FailureKind::Storage => true,
            FailureKind::PermanentRemote | FailureKind::Cancelled => false,
        }
    }

    /// Exponential backoff delay for the given 1-based failed-attempt number
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let multiplier = self.config.backoff_multiplier.powi(exponent as i32);
        let raw = Duration::from_secs_f64(
            (self.config.initial_delay.as_secs_f64() * multiplier)
                .min(self.config.max_delay.as_secs_f64()),
        );

        if self.config.jitter {
            add_jitter(raw)
        } else {
            raw
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay lands between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
