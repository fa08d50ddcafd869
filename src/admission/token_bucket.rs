//! Token bucket with whole-period replenishment.

use std::time::Duration;
use tokio::time::Instant;

use super::policy::TokenBucketOptions;
use super::queue::Permits;

/// A bucket that starts full and gains `tokens_per_period` tokens at every
/// elapsed replenish period, capped at `token_limit`.
///
/// `last_replenish` only advances by whole periods, so the partial period
/// in progress is never lost between checks.
#[derive(Debug)]
pub struct TokenBucket {
    options: TokenBucketOptions,
    tokens: u32,
    last_replenish: Instant,
}

impl TokenBucket {
    pub fn new(options: TokenBucketOptions, now: Instant) -> Self {
        Self {
            options,
            tokens: options.token_limit,
            last_replenish: now,
        }
    }

    /// Tokens currently in the bucket.
    pub fn tokens(&self) -> u32 {
        self.tokens
    }
}

impl Permits for TokenBucket {
    fn refresh(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_replenish);
        let period = self.options.replenish_period.as_nanos();
        let periods = elapsed.as_nanos() / period;
        if periods == 0 {
            return;
        }

        let added = periods.saturating_mul(u128::from(self.options.tokens_per_period));
        let limit = u128::from(self.options.token_limit);
        self.tokens = (u128::from(self.tokens) + added).min(limit) as u32;

        // remainder < period, which fits in a Duration built from u64 nanos
        let remainder = Duration::from_nanos((elapsed.as_nanos() % period) as u64);
        self.last_replenish = now - remainder;
    }

    fn try_take(&mut self) -> bool {
        debug_assert!(self.tokens <= self.options.token_limit);
        if self.tokens >= 1 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn refund(&mut self) {
        self.tokens = (self.tokens + 1).min(self.options.token_limit);
    }

    fn available(&self) -> u32 {
        self.tokens
    }

    fn until_release(&self, now: Instant) -> Duration {
        (self.last_replenish + self.options.replenish_period).saturating_duration_since(now)
    }
}
