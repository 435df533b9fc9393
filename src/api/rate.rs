use std::time::{Duration, Instant};

use crate::config::RATE_WINDOW_SECS;
use crate::error::ApiError;

/// Process-local call counter over a rolling one-minute window.
///
/// There is no queuing: once `limit` calls have been made inside the current
/// window, further calls fail until the window rolls over.
#[derive(Debug)]
pub struct RateCounter {
    limit: u32,
    window: Duration,
    calls: u32,
    window_start: Instant,
}

impl RateCounter {
    pub fn new(limit: u32) -> Self {
        Self::with_window(limit, Duration::from_secs(RATE_WINDOW_SECS))
    }

    pub fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            calls: 0,
            window_start: Instant::now(),
        }
    }

    pub fn check(&mut self) -> Result<(), ApiError> {
        self.check_at(Instant::now())
    }

    pub fn check_at(&mut self, now: Instant) -> Result<(), ApiError> {
        if now.saturating_duration_since(self.window_start) > self.window {
            self.calls = 0;
            self.window_start = now;
        }
        if self.calls >= self.limit {
            return Err(ApiError::RateLimitExceeded { limit: self.limit });
        }
        self.calls += 1;
        Ok(())
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }
}
