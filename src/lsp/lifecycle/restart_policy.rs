//! Crash-restart rate limiting.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Automatic restarts allowed inside one window.
pub const MAX_RESTARTS: usize = 4;

/// Sliding window for [`MAX_RESTARTS`].
pub const RESTART_WINDOW: Duration = Duration::from_secs(3 * 60);

/// Sliding-window limit on automatic restarts after a crash.
#[derive(Debug)]
pub struct RestartPolicy {
    max_restarts: usize,
    window: Duration,
    history: VecDeque<Instant>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new(MAX_RESTARTS, RESTART_WINDOW)
    }
}

impl RestartPolicy {
    pub fn new(max_restarts: usize, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
            history: VecDeque::with_capacity(max_restarts),
        }
    }

    /// Record a restart attempt at `now`. Returns `false` (and records
    /// nothing) when the window is already full.
    pub fn try_record(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.history.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.history.pop_front();
            } else {
                break;
            }
        }

        if self.history.len() >= self.max_restarts {
            return false;
        }
        self.history.push_back(now);
        true
    }

    /// Forget past crashes, e.g. after the user restarts explicitly.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn recent(&self) -> usize {
        self.history.len()
    }
}
