//! Sliding-window rate limiter for outbound AI requests
//!
//! Purely local admission control; server-side 429 handling lives in the
//! client and never touches this window.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_CEILING: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit window must be greater than zero")]
    InvalidWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected { retry_after_secs: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub remaining: usize,
    /// Seconds until the oldest request leaves the window (0 if empty)
    pub reset_in: u64,
}

pub struct RateLimiter {
    window: Duration,
    ceiling: usize,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration, ceiling: usize) -> Result<Self, RateLimitError> {
        if window.is_zero() {
            return Err(RateLimitError::InvalidWindow);
        }
        Ok(Self {
            window,
            ceiling,
            timestamps: Mutex::new(VecDeque::new()),
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    fn purge(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = timestamps.front() {
            if now.duration_since(oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn check(&self, timestamps: &VecDeque<Instant>, now: Instant) -> Admission {
        if timestamps.len() < self.ceiling {
            return Admission::Admitted;
        }
        // Ceiling 0 with an empty window: nothing will ever leave it
        let wait = match timestamps.front() {
            Some(&oldest) => (oldest + self.window).saturating_duration_since(now),
            None => self.window,
        };
        Admission::Rejected {
            retry_after_secs: ceil_secs(wait).max(1),
        }
    }

    /// Would a request be admitted now? Does not record it.
    pub fn try_admit(&self) -> Admission {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        self.purge(&mut timestamps, now);
        self.check(&timestamps, now)
    }

    /// Record a request issued now
    pub fn record(&self) {
        self.timestamps.lock().push_back(Instant::now());
    }

    /// Admit and record under one lock, so concurrent callers can't all pass
    /// the check before any of them records.
    pub fn acquire(&self) -> Admission {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        self.purge(&mut timestamps, now);
        let admission = self.check(&timestamps, now);
        if admission == Admission::Admitted {
            timestamps.push_back(now);
        }
        admission
    }

    pub fn status(&self) -> RateLimitStatus {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        self.purge(&mut timestamps, now);

        let reset_in = timestamps
            .front()
            .map(|&oldest| ceil_secs((oldest + self.window).saturating_duration_since(now)))
            .unwrap_or(0);

        RateLimitStatus {
            remaining: self.ceiling.saturating_sub(timestamps.len()),
            reset_in,
        }
    }

    /// Forget every recorded request
    pub fn reset(&self) {
        self.timestamps.lock().clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            ceiling: DEFAULT_CEILING,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}
