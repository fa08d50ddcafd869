//! Fixed-window counter.

use std::time::Duration;
use tokio::time::Instant;

use super::policy::FixedWindowOptions;
use super::queue::Permits;

/// Counts admissions inside a window that restarts at the first request
/// arriving after the previous window has elapsed.
#[derive(Debug)]
pub struct FixedWindow {
    options: FixedWindowOptions,
    /// When the current window started
    window_start: Instant,
    /// Admissions granted in the current window
    count: u32,
}

impl FixedWindow {
    pub fn new(options: FixedWindowOptions, now: Instant) -> Self {
        Self {
            options,
            window_start: now,
            count: 0,
        }
    }

    /// Admissions granted in the current window.
    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Permits for FixedWindow {
    fn refresh(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_start) >= self.options.window {
            self.window_start = now;
            self.count = 0;
        }
    }

    fn try_take(&mut self) -> bool {
        if self.count < self.options.permit_limit {
            self.count += 1;
            debug_assert!(self.count <= self.options.permit_limit);
            true
        } else {
            false
        }
    }

    fn refund(&mut self) {
        debug_assert!(self.count > 0, "refund without a granted permit");
        self.count = self.count.saturating_sub(1);
    }

    fn available(&self) -> u32 {
        self.options.permit_limit - self.count
    }

    fn until_release(&self, now: Instant) -> Duration {
        (self.window_start + self.options.window).saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(permit_limit: u32, secs: u64) -> FixedWindowOptions {
        FixedWindowOptions {
            permit_limit,
            window: Duration::from_secs(secs),
            queue_limit: 0,
        }
    }

    #[test]
    fn test_admits_up_to_permit_limit() {
        let now = Instant::now();
        let mut counter = FixedWindow::new(window(4, 12), now);

        for _ in 0..4 {
            counter.refresh(now);
            assert!(counter.try_take());
        }
        counter.refresh(now);
        assert!(!counter.try_take());
        assert_eq!(counter.count(), 4);
        assert_eq!(counter.available(), 0);
    }

    #[test]
    fn test_window_resets_after_length() {
        let start = Instant::now();
        let mut counter = FixedWindow::new(window(4, 12), start);
        for _ in 0..4 {
            assert!(counter.try_take());
        }

        // Just before the boundary nothing changes
        counter.refresh(start + Duration::from_millis(11_999));
        assert!(!counter.try_take());

        counter.refresh(start + Duration::from_millis(12_001));
        assert_eq!(counter.count(), 0);
        assert!(counter.try_take());
    }

    #[test]
    fn test_new_window_starts_at_first_late_request() {
        let start = Instant::now();
        let mut counter = FixedWindow::new(window(1, 10), start);
        assert!(counter.try_take());

        let late = start + Duration::from_secs(25);
        counter.refresh(late);
        assert!(counter.try_take());
        assert_eq!(counter.until_release(late), Duration::from_secs(10));
    }

    #[test]
    fn test_until_release() {
        let start = Instant::now();
        let counter = FixedWindow::new(window(4, 12), start);

        assert_eq!(
            counter.until_release(start + Duration::from_secs(2)),
            Duration::from_secs(10)
        );
        assert_eq!(
            counter.until_release(start + Duration::from_secs(30)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_refund_returns_permit() {
        let now = Instant::now();
        let mut counter = FixedWindow::new(window(1, 12), now);

        assert!(counter.try_take());
        counter.refund();
        assert_eq!(counter.count(), 0);
        assert!(counter.try_take());
    }
}
