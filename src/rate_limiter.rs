//! Request rate limiting using token bucket algorithm
//!
//! The RateLimiter is the single gate for all outbound calls to the remote
//! API. The listing walker and every download worker share one bucket, so the
//! externally imposed quota holds regardless of concurrency.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Millitokens per whole token; tokens are tracked at 1/1000 granularity so
/// fractional refill rates accumulate without drift.
const MILLITOKENS: u64 = 1000;

/// Global request rate limiter shared across the walker and all workers
///
/// Uses a token bucket algorithm with lock-free atomic token tracking.
///
/// # Algorithm
///
/// - Tokens represent remote calls that may be made
/// - Tokens refill at a constant rate (`rate_per_second`) up to `burst_capacity`
/// - Callers acquire the full cost of a call before making it
/// - If insufficient tokens, the caller waits until refill
///
/// # Cancellation
///
/// `acquire` consumes tokens in a single compare-and-swap only once the full
/// cost is available. A caller cancelled while waiting (its future dropped)
/// has consumed nothing.
#[derive(Clone)]
pub struct RateLimiter {
    /// Refill rate in millitokens per second
    rate: u64,
    /// Bucket capacity in millitokens
    capacity: u64,
    /// Available millitokens
    tokens: Arc<AtomicU64>,
    /// Last refill timestamp (nanoseconds since arbitrary epoch)
    last_refill: Arc<AtomicU64>,
}

impl RateLimiter {
    /// Create a new RateLimiter
    ///
    /// The bucket starts full, allowing an immediate burst of up to
    /// `burst_capacity` calls.
    ///
    /// # Arguments
    ///
    /// * `rate_per_second` - Steady refill rate in tokens per second
    /// * `burst_capacity` - Bucket capacity in whole tokens
    ///
    /// # Examples
    ///
    /// ```
    /// use callrec_dl::rate_limiter::RateLimiter;
    ///
    /// // 2.5 calls/second, bursts of up to 10
    /// let limiter = RateLimiter::new(2.5, 10);
    /// ```
    #[must_use]
    pub fn new(rate_per_second: f64, burst_capacity: u32) -> Self {
        let rate = ((rate_per_second.max(0.0) * MILLITOKENS as f64) as u64).max(1);
        let capacity = (burst_capacity as u64).max(1) * MILLITOKENS;

        Self {
            rate,
            capacity,
            tokens: Arc::new(AtomicU64::new(capacity)),
            last_refill: Arc::new(AtomicU64::new(Self::now_nanos())),
        }
    }

    /// Acquire permission for a remote call costing `cost` tokens
    ///
    /// Blocks until at least `cost` tokens are available, then consumes them
    /// atomically. Never errors; it only delays. A cost of zero returns
    /// immediately. Costs above the bucket capacity are clamped to the
    /// capacity, since they could otherwise never be satisfied.
    pub async fn acquire(&self, cost: u32) {
        if cost == 0 {
            return;
        }

        let need = (cost as u64 * MILLITOKENS).min(self.capacity);

        loop {
            self.refill_tokens();

            let current = self.tokens.load(Ordering::SeqCst);
            if current >= need {
                if self
                    .tokens
                    .compare_exchange(current, current - need, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return;
                }
                // CAS raced with another acquirer - retry immediately
                continue;
            }

            // Not enough tokens - wait roughly until the deficit refills.
            // Capped at 100ms so concurrent acquirers interleave fairly.
            let missing = need - current;
            let wait_ms = missing.saturating_mul(1000) / self.rate;
            tokio::time::sleep(Duration::from_millis(wait_ms.clamp(5, 100))).await;
        }
    }

    /// Currently available whole tokens (for monitoring and tests)
    pub fn available(&self) -> f64 {
        self.refill_tokens();
        self.tokens.load(Ordering::SeqCst) as f64 / MILLITOKENS as f64
    }

    /// Refill tokens based on elapsed time since last refill
    fn refill_tokens(&self) {
        let now = Self::now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);

        let elapsed_nanos = now.saturating_sub(last);
        let elapsed_secs = elapsed_nanos as f64 / 1_000_000_000.0;
        let tokens_to_add = (self.rate as f64 * elapsed_secs) as u64;

        if tokens_to_add > 0 {
            // Only the winner of the timestamp CAS adds tokens, so concurrent
            // refills never double-count an interval.
            if self
                .last_refill
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                let current = self.tokens.load(Ordering::SeqCst);
                let new_tokens = (current + tokens_to_add).min(self.capacity);
                self.tokens.store(new_tokens, Ordering::SeqCst);
            }
        }
    }

    /// Get current monotonic time in nanoseconds
    ///
    /// Uses a monotonic clock that is not affected by system time changes.
    /// The epoch is arbitrary but consistent within a process lifetime.
    fn now_nanos() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}
