//! Bounded FIFO of requests waiting for capacity.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Capacity accounting shared by the limiting algorithms.
pub trait Permits {
    /// Apply any window reset or replenishment due at `now`.
    fn refresh(&mut self, now: Instant);

    /// Consume one permit if one is available.
    fn try_take(&mut self) -> bool;

    /// Return a permit taken in the same critical section.
    fn refund(&mut self);

    /// Permits that can be granted right now.
    fn available(&self) -> u32;

    /// Time until the next capacity-release event (window end or replenish).
    fn until_release(&self, now: Instant) -> Duration;
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    release: oneshot::Sender<()>,
}

/// Waiters in arrival order, bounded by the policy's queue limit.
#[derive(Debug)]
pub struct WaitQueue {
    waiters: VecDeque<Waiter>,
    limit: usize,
    next_id: u64,
}

impl WaitQueue {
    pub fn new(limit: u32) -> Self {
        Self {
            waiters: VecDeque::new(),
            limit: limit as usize,
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Append a waiter at the back. Returns `None` when the queue is full.
    pub fn push(&mut self) -> Option<(u64, oneshot::Receiver<()>)> {
        if self.waiters.len() >= self.limit {
            return None;
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(Waiter { id, release: tx });
        Some((id, rx))
    }

    /// Remove a waiter that gave up. Returns whether it was still queued.
    pub fn remove(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    /// Hand permits to waiters oldest-first while `permits` has capacity.
    ///
    /// Waiters whose receiver is gone are discarded without consuming a
    /// permit. Returns the number of waiters released.
    pub fn release<P: Permits + ?Sized>(&mut self, permits: &mut P) -> usize {
        let mut released = 0;

        while let Some(front) = self.waiters.front() {
            if front.release.is_closed() {
                self.waiters.pop_front();
                continue;
            }
            if !permits.try_take() {
                break;
            }
            if let Some(waiter) = self.waiters.pop_front() {
                if waiter.release.send(()).is_ok() {
                    released += 1;
                } else {
                    permits.refund();
                }
            }
        }

        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple counter of free permits.
    struct Slots(u32);

    impl Permits for Slots {
        fn refresh(&mut self, _now: Instant) {}

        fn try_take(&mut self) -> bool {
            if self.0 > 0 {
                self.0 -= 1;
                true
            } else {
                false
            }
        }

        fn refund(&mut self) {
            self.0 += 1;
        }

        fn available(&self) -> u32 {
            self.0
        }

        fn until_release(&self, _now: Instant) -> Duration {
            Duration::ZERO
        }
    }

    #[test]
    fn test_push_respects_limit() {
        let mut queue = WaitQueue::new(2);

        assert!(queue.push().is_some());
        assert!(queue.push().is_some());
        assert!(queue.push().is_none());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_zero_limit_never_queues() {
        let mut queue = WaitQueue::new(0);
        assert!(queue.push().is_none());
    }

    #[test]
    fn test_release_is_fifo() {
        let mut queue = WaitQueue::new(3);
        let (_, mut first) = queue.push().unwrap();
        let (_, mut second) = queue.push().unwrap();
        let (_, mut third) = queue.push().unwrap();

        let mut slots = Slots(2);
        assert_eq!(queue.release(&mut slots), 2);

        assert!(first.try_recv().is_ok());
        assert!(second.try_recv().is_ok());
        assert!(third.try_recv().is_err());
        assert_eq!(queue.len(), 1);
        assert_eq!(slots.available(), 0);
    }

    #[test]
    fn test_dropped_waiter_does_not_consume_permit() {
        let mut queue = WaitQueue::new(2);
        let (_, abandoned) = queue.push().unwrap();
        let (_, mut waiting) = queue.push().unwrap();
        drop(abandoned);

        let mut slots = Slots(1);
        assert_eq!(queue.release(&mut slots), 1);

        assert!(waiting.try_recv().is_ok());
        assert!(queue.is_empty());
        assert_eq!(slots.available(), 0);
    }

    #[test]
    fn test_remove_by_id() {
        let mut queue = WaitQueue::new(2);
        let (first, _rx1) = queue.push().unwrap();
        let (_second, _rx2) = queue.push().unwrap();

        assert!(queue.remove(first));
        assert!(!queue.remove(first));
        assert_eq!(queue.len(), 1);
    }
}
