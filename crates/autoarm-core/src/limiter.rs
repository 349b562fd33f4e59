// ── Rate limiter ──
//
// Sliding-window call counter guarding against arm/disarm storms.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Rejects calls once more than `max_calls` land inside the trailing window.
#[derive(Debug, Clone)]
pub struct Limiter {
    window: Duration,
    max_calls: usize,
    calls: VecDeque<Instant>,
}

impl Limiter {
    pub fn new(window: Duration, max_calls: usize) -> Self {
        Self {
            window,
            max_calls,
            calls: VecDeque::with_capacity(max_calls + 1),
        }
    }

    /// Record a call now and report whether the limit is exceeded.
    pub fn triggered(&mut self) -> bool {
        self.triggered_at(Instant::now())
    }

    /// Record a call at `now`, evict calls older than the window, and
    /// report whether more than `max_calls` remain.
    pub fn triggered_at(&mut self, now: Instant) -> bool {
        self.calls.push_back(now);
        if let Some(cutoff) = now.checked_sub(self.window) {
            while self.calls.front().is_some_and(|call| *call < cutoff) {
                self.calls.pop_front();
            }
        }
        self.calls.len() > self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    /// Calls currently counted inside the window.
    pub fn in_window(&self) -> usize {
        self.calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_on_the_call_after_max() {
        let mut limiter = Limiter::new(Duration::from_secs(10), 3);
        let start = Instant::now();
        assert!(!limiter.triggered_at(start));
        assert!(!limiter.triggered_at(start + Duration::from_secs(1)));
        assert!(!limiter.triggered_at(start + Duration::from_secs(2)));
        assert!(limiter.triggered_at(start + Duration::from_secs(3)));
    }

    #[test]
    fn window_expiry_resets_count() {
        let mut limiter = Limiter::new(Duration::from_secs(10), 2);
        let start = Instant::now();
        for offset in 0..3 {
            limiter.triggered_at(start + Duration::from_secs(offset));
        }
        assert!(!limiter.triggered_at(start + Duration::from_secs(20)));
        assert_eq!(limiter.in_window(), 1);
    }

    #[test]
    fn rejected_calls_still_count() {
        let mut limiter = Limiter::new(Duration::from_secs(60), 1);
        let start = Instant::now();
        assert!(!limiter.triggered_at(start));
        assert!(limiter.triggered_at(start + Duration::from_secs(1)));
        assert!(limiter.triggered_at(start + Duration::from_secs(2)));
        assert_eq!(limiter.in_window(), 3);
    }
}
