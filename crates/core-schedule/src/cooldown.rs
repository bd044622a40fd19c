//! Rate limiter: a single cooldown window restarted after every flush.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cooldown {
    expires_at: Option<Instant>,
}

impl Cooldown {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)start the window at `now`. Any previous window is replaced.
    pub fn start(&mut self, now: Instant, duration: Duration) {
        self.expires_at = Some(now + duration);
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now < at)
    }

    /// Time left until the window closes; zero when inactive.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or_default()
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Earliest instant a flush requested for `at` may actually happen.
    pub fn clamp(&self, at: Instant) -> Instant {
        match self.expires_at {
            Some(expiry) => at.max(expiry),
            None => at,
        }
    }
}
