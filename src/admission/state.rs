//! Per-partition limiter state and the admission decision it produces.

use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::fixed_window::FixedWindow;
use super::policy::LimiterOptions;
use super::queue::{Permits, WaitQueue};
use super::token_bucket::TokenBucket;

/// Outcome of a single limiter check.
#[derive(Debug)]
pub enum Decision {
    /// A permit was granted.
    Admit,
    /// The request joined the wait queue.
    Queued {
        id: u64,
        release: oneshot::Receiver<()>,
        /// Upper bound on the wait: time to the next capacity release
        max_wait: Duration,
    },
    /// No capacity and no queue room.
    Reject { retry_after: Duration },
}

#[derive(Debug)]
enum Algorithm {
    FixedWindow(FixedWindow),
    TokenBucket(TokenBucket),
}

impl Algorithm {
    fn as_permits(&mut self) -> &mut dyn Permits {
        match self {
            Algorithm::FixedWindow(w) => w,
            Algorithm::TokenBucket(b) => b,
        }
    }

    fn permits(&self) -> &dyn Permits {
        match self {
            Algorithm::FixedWindow(w) => w,
            Algorithm::TokenBucket(b) => b,
        }
    }
}

/// Limiter state for one (policy, partition) pair.
///
/// Not synchronised; callers hold the owning entry's lock.
#[derive(Debug)]
pub struct LimiterState {
    algorithm: Algorithm,
    queue: WaitQueue,
    last_access: Instant,
}

impl LimiterState {
    pub fn new(options: LimiterOptions, now: Instant) -> Self {
        let algorithm = match options {
            LimiterOptions::FixedWindow(o) => Algorithm::FixedWindow(FixedWindow::new(o, now)),
            LimiterOptions::TokenBucket(o) => Algorithm::TokenBucket(TokenBucket::new(o, now)),
        };

        Self {
            algorithm,
            queue: WaitQueue::new(options.queue_limit()),
            last_access: now,
        }
    }

    /// Evaluate one request at `now`.
    ///
    /// Waiters already queued are served before the new arrival, so a request
    /// is only admitted directly when the queue is empty.
    pub fn acquire(&mut self, now: Instant) -> Decision {
        self.release_waiters(now);

        if self.queue.is_empty() && self.algorithm.as_permits().try_take() {
            return Decision::Admit;
        }

        let max_wait = self.algorithm.permits().until_release(now);
        match self.queue.push() {
            Some((id, release)) => Decision::Queued {
                id,
                release,
                max_wait,
            },
            None => Decision::Reject {
                retry_after: max_wait,
            },
        }
    }

    /// Apply the refresh due at `now` and release waiters oldest-first.
    pub fn release_waiters(&mut self, now: Instant) -> usize {
        self.last_access = now;
        let permits = self.algorithm.as_permits();
        permits.refresh(now);
        self.queue.release(permits)
    }

    /// Drop a queued waiter. Returns whether it was still queued.
    pub fn cancel(&mut self, id: u64) -> bool {
        self.queue.remove(id)
    }

    /// Give back a permit handed to a waiter that left before using it.
    ///
    /// The permit goes to the next queued waiter, if any. Returns the number
    /// of waiters released.
    pub fn refund(&mut self) -> usize {
        let permits = self.algorithm.as_permits();
        permits.refund();
        self.queue.release(permits)
    }

    pub fn retry_after(&self, now: Instant) -> Duration {
        self.algorithm.permits().until_release(now)
    }

    /// Permits grantable right now, as of the last refresh.
    pub fn available(&self) -> u32 {
        self.algorithm.permits().available()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Whether the state has been untouched for at least `idle` and holds no waiters.
    pub fn is_idle(&self, now: Instant, idle: Duration) -> bool {
        self.queue.is_empty() && now.saturating_duration_since(self.last_access) >= idle
    }
}
