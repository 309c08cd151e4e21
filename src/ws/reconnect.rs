//! Fixed-delay reconnection policy.

use std::time::Duration;

use backoff::backoff::{Backoff as _, Constant};

use super::config::ReconnectConfig;

/// Decides whether and when to retry after an unexpected disconnect.
///
/// Every failed attempt since the last successful open counts toward
/// [`ReconnectConfig::max_attempts`]. A successful open calls [`reset`](Self::reset).
pub struct ReconnectPolicy {
    schedule: Constant,
    max_attempts: Option<u32>,
    attempt: u32,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        let max_attempts = config.max_attempts;
        Self {
            schedule: config.into(),
            max_attempts,
            attempt: 0,
        }
    }

    /// Delay before the next attempt, or `None` when the attempt cap is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_attempts
            && self.attempt >= max
        {
            return None;
        }

        self.attempt = self.attempt.saturating_add(1);
        self.schedule.next_backoff()
    }

    /// Number of retries scheduled since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.schedule.reset();
    }
}
