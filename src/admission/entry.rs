//! Shared, lock-protected limiter entries and queue tickets.

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::trace;

use super::policy::LimiterOptions;
use super::state::{Decision, LimiterState};

/// Result of checking a request against one limiter entry.
#[derive(Debug)]
pub enum Acquire {
    Admitted,
    Queued(Ticket),
    Rejected { retry_after: Duration },
}

/// A limiter state shared by every request of one (policy, partition) pair.
///
/// All access to the state is serialised by the entry lock.
#[derive(Debug)]
pub struct LimiterEntry {
    state: Mutex<LimiterState>,
}

impl LimiterEntry {
    pub fn new(options: LimiterOptions, now: Instant) -> Self {
        Self {
            state: Mutex::new(LimiterState::new(options, now)),
        }
    }

    /// Check one request. A queued request receives a [`Ticket`] to wait on.
    pub fn acquire(self: &Arc<Self>, now: Instant) -> Acquire {
        let decision = self.state.lock().acquire(now);

        match decision {
            Decision::Admit => Acquire::Admitted,
            Decision::Reject { retry_after } => Acquire::Rejected { retry_after },
            Decision::Queued {
                id,
                release,
                max_wait,
            } => Acquire::Queued(Ticket {
                entry: Arc::clone(self),
                id,
                release,
                max_wait,
                settled: false,
            }),
        }
    }

    /// Time until this limiter next frees capacity.
    pub fn retry_after(&self, now: Instant) -> Duration {
        self.state.lock().retry_after(now)
    }

    /// Lock the state for inspection.
    pub fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock()
    }

    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, LimiterState>> {
        self.state.try_lock()
    }
}

/// A place in a limiter's wait queue.
///
/// Dropping an unsettled ticket removes it from the queue, or returns the
/// permit it was granted, so a cancelled request never consumes a slot.
#[derive(Debug)]
pub struct Ticket {
    entry: Arc<LimiterEntry>,
    id: u64,
    release: oneshot::Receiver<()>,
    max_wait: Duration,
    settled: bool,
}

impl Ticket {
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Wait for a release, bounded by the time to the next capacity event.
    ///
    /// When the bound elapses the ticket re-evaluates once: it runs the
    /// release step itself and gives up if it still was not served.
    /// Returns whether a permit was granted.
    pub async fn wait(mut self) -> bool {
        let granted = match tokio::time::timeout(self.max_wait, &mut self.release).await {
            Ok(result) => result.is_ok(),
            Err(_) => {
                let mut state = self.entry.state.lock();
                state.release_waiters(Instant::now());
                match self.release.try_recv() {
                    Ok(()) => true,
                    Err(_) => {
                        state.cancel(self.id);
                        false
                    }
                }
            }
        };

        trace!(ticket = self.id, granted, "Queued request settled");
        self.settled = true;
        granted
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let mut state = self.entry.state.lock();
        // Already popped and granted, but the permit was never used
        if !state.cancel(self.id) && self.release.try_recv().is_ok() {
            state.refund();
            trace!(ticket = self.id, "Unused permit returned by cancelled waiter");
        }
    }
}
