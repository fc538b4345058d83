//! Sliding-window message rate limiter (one per user).

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Allows at most `limit` hits within any rolling `window`.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    hits: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: VecDeque::with_capacity(limit),
        }
    }

    /// Record a hit at `now` if the window has room. Rejected hits are not recorded.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.hits.front() {
            if now.duration_since(*oldest) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        if self.hits.len() >= self.limit {
            return false;
        }
        self.hits.push_back(now);
        true
    }

    /// True when every recorded hit has aged out of the window at `now`.
    pub fn is_idle(&self, now: Instant) -> bool {
        self.hits
            .back()
            .map_or(true, |last| now.duration_since(*last) >= self.window)
    }
}
