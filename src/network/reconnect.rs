//! Viewer reconnection with exponential backoff

use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Bounded exponential backoff schedule
#[derive(Debug)]
pub struct ReconnectController {
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    attempt: u32,
    scheduled_at: Option<Instant>,
}

impl ReconnectController {
    pub fn new(initial_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts,
            attempt: 0,
            scheduled_at: None,
        }
    }

    /// Delay before attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Schedule the next attempt
    ///
    /// Returns the delay, or `None` once the attempt budget is spent.
    pub fn schedule(&mut self, now: Instant) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            warn!("Reconnection budget exhausted after {} attempts", self.attempt);
            self.scheduled_at = None;
            return None;
        }

        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        self.scheduled_at = Some(now + delay);
        info!(
            "Reconnecting in {:?} (attempt {}/{})",
            delay, self.attempt, self.max_attempts
        );
        Some(delay)
    }

    /// Whether a scheduled attempt is due; clears the schedule if so
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.scheduled_at {
            Some(at) if at <= now => {
                self.scheduled_at = None;
                true
            }
            _ => false,
        }
    }

    /// The current connection attempt is a retry
    pub fn is_reconnecting(&self) -> bool {
        self.attempt > 0
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduled_at
    }

    /// Cancel any pending attempt, keeping the counter
    pub fn cancel(&mut self) {
        self.scheduled_at = None;
    }

    /// Successful connection: start over from attempt 0
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.scheduled_at = None;
    }
}
