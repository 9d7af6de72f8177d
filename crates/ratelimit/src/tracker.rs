//! Sliding-window request tracker for one quota tier.

use std::collections::VecDeque;
use std::time::Duration;

use matchwatch_common::{AppError, AppResult};
use serde::Serialize;
use tokio::time::Instant;

/// Counts requests inside a trailing window of fixed length.
///
/// A timestamp stays in the window while `now - timestamp <= window`, so the
/// tracker is at capacity iff `capacity` requests fall inside `[now - window, now]`.
#[derive(Debug, Clone)]
pub struct RateLimitTracker {
    capacity: usize,
    window: Duration,
    timestamps: VecDeque<Instant>,
}

/// Point-in-time view of a tracker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStats {
    pub capacity: usize,
    pub window_secs: f64,
    pub used: usize,
    pub remaining: usize,
    pub wait_ms: u64,
}

impl RateLimitTracker {
    /// Create a tracker allowing `capacity` requests per `window`.
    pub fn new(capacity: usize, window: Duration) -> AppResult<Self> {
        if capacity == 0 {
            return Err(AppError::Config(
                "rate limit tracker capacity must be positive".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(AppError::Config(
                "rate limit tracker window must be positive".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            window,
            timestamps: VecDeque::with_capacity(capacity),
        })
    }

    /// Requests allowed per window.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Whether one more request fits in the window ending at `now`.
    pub fn can_make_request(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.timestamps.len() < self.capacity
    }

    /// Record a request at `now`.
    ///
    /// Does not check capacity; callers check [`Self::can_make_request`] first.
    pub fn record_request(&mut self, now: Instant) {
        // Keep the sequence non-decreasing even if a caller passes a stale instant.
        let at = self.timestamps.back().map_or(now, |&last| last.max(now));
        self.timestamps.push_back(at);
    }

    /// How long until one more request fits; zero if it fits now.
    pub fn get_wait_time(&mut self, now: Instant) -> Duration {
        if self.can_make_request(now) {
            return Duration::ZERO;
        }
        // With more recorded than allowed (after a usage sync), the slot frees
        // up only once the surplus has also aged out.
        let index = self.timestamps.len() - self.capacity;
        self.timestamps
            .get(index)
            .map_or(Duration::ZERO, |&ts| {
                (ts + self.window).saturating_duration_since(now)
            })
    }

    /// Requests currently inside the window.
    pub fn current_usage(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.timestamps.len()
    }

    /// Requests still available in the window.
    pub fn remaining(&mut self, now: Instant) -> usize {
        self.capacity.saturating_sub(self.current_usage(now))
    }

    /// Change the capacity, keeping recorded timestamps.
    pub fn set_capacity(&mut self, capacity: usize) -> AppResult<()> {
        if capacity == 0 {
            return Err(AppError::Config(
                "rate limit tracker capacity must be positive".to_string(),
            ));
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Raise local usage to match what the provider reports for this window.
    ///
    /// Only ever adds timestamps; a lower report is ignored since our own
    /// records are the more conservative view.
    pub fn sync_usage(&mut self, reported: usize, now: Instant) {
        let used = self.current_usage(now);
        for _ in used..reported {
            self.record_request(now);
        }
    }

    /// Forget every recorded request.
    pub fn clear(&mut self) {
        self.timestamps.clear();
    }

    /// Snapshot for stats reporting.
    pub fn stats(&mut self, now: Instant) -> TrackerStats {
        let used = self.current_usage(now);
        TrackerStats {
            capacity: self.capacity,
            window_secs: self.window.as_secs_f64(),
            used,
            remaining: self.capacity.saturating_sub(used),
            wait_ms: self.get_wait_time(now).as_millis() as u64,
        }
    }
}
