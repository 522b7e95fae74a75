//! Access control: PIN authentication, failure throttling, join rate limits

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::transport::PeerId;

/// Result of checking an authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Approved,
    /// Wrong PIN; `blocked` is set when this failure triggered a block
    Rejected { blocked: bool },
    /// Peer is cooling down; the PIN was not checked
    Blocked { until: Instant },
}

#[derive(Debug, Default, Clone, Copy)]
struct FailureRecord {
    failed_count: u32,
    blocked_until: Option<Instant>,
}

/// Host-side PIN check with per-peer failure tracking
#[derive(Debug)]
pub struct PinGuard {
    pin: Option<String>,
    max_failures: u32,
    block_duration: Duration,
    failures: HashMap<PeerId, FailureRecord>,
}

impl PinGuard {
    pub fn new(pin: Option<String>, max_failures: u32, block_duration: Duration) -> Self {
        Self {
            pin,
            max_failures,
            block_duration,
            failures: HashMap::new(),
        }
    }

    pub fn requires_pin(&self) -> bool {
        self.pin.is_some()
    }

    /// Block deadline for `peer`, if it is blocked at `now`
    pub fn blocked_until(&self, peer: &PeerId, now: Instant) -> Option<Instant> {
        self.failures
            .get(peer)
            .and_then(|r| r.blocked_until)
            .filter(|until| *until > now)
    }

    /// Check an authentication attempt from `peer`
    pub fn check(&mut self, peer: &PeerId, attempt: Option<&str>, now: Instant) -> AuthDecision {
        let Some(expected) = self.pin.as_deref() else {
            return AuthDecision::Approved;
        };

        if let Some(until) = self.blocked_until(peer, now) {
            debug!("Auth attempt from blocked peer {}", peer);
            return AuthDecision::Blocked { until };
        }

        if attempt == Some(expected) {
            self.failures.remove(peer);
            info!("Peer {} authenticated", peer);
            return AuthDecision::Approved;
        }

        let record = self.failures.entry(peer.clone()).or_default();
        if record.blocked_until.is_some() {
            // Cool-down elapsed; start counting afresh
            *record = FailureRecord::default();
        }
        record.failed_count += 1;

        if record.failed_count >= self.max_failures {
            record.blocked_until = Some(now + self.block_duration);
            warn!(
                "Peer {} blocked for {:?} after {} failed PIN attempts",
                peer, self.block_duration, record.failed_count
            );
            AuthDecision::Rejected { blocked: true }
        } else {
            warn!(
                "Peer {} failed PIN check ({}/{})",
                peer, record.failed_count, self.max_failures
            );
            AuthDecision::Rejected { blocked: false }
        }
    }

    /// Forget every failure record
    pub fn reset(&mut self) {
        self.failures.clear();
    }
}

/// Viewer-side sliding-window limit on join attempts
#[derive(Debug)]
pub struct JoinRateLimiter {
    max_attempts: usize,
    window: Duration,
    cooldown: Duration,
    attempts: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
}

impl JoinRateLimiter {
    pub fn new(max_attempts: usize, window: Duration, cooldown: Duration) -> Self {
        Self {
            max_attempts,
            window,
            cooldown,
            attempts: VecDeque::new(),
            cooldown_until: None,
        }
    }

    /// Record a join attempt, or return how long to wait
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        if let Some(until) = self.cooldown_until {
            if until > now {
                return Err(until - now);
            }
            self.cooldown_until = None;
            self.attempts.clear();
        }

        while let Some(&oldest) = self.attempts.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }

        if self.attempts.len() >= self.max_attempts {
            warn!(
                "{} join attempts within {:?}; cooling down for {:?}",
                self.attempts.len() + 1,
                self.window,
                self.cooldown
            );
            self.cooldown_until = Some(now + self.cooldown);
            return Err(self.cooldown);
        }

        self.attempts.push_back(now);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.attempts.clear();
        self.cooldown_until = None;
    }
}
