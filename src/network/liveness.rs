//! Heartbeat-based liveness monitoring
//!
//! Once a channel is authenticated each side pings on a fixed interval. Any
//! inbound ping, or a pong echoing one of our timestamps, counts as proof of
//! life. Silence for longer than the timeout means the partner is gone.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

/// What the monitor wants done when its deadline passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing due yet
    Idle,
    /// Send a ping carrying this timestamp (ms since monitor start)
    SendPing(u64),
    /// No sign of life within the timeout
    TimedOut,
}

/// Ping/pong liveness state for one channel
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    /// Reference point for ping timestamps, set by [`Heartbeat::start`]
    epoch: Option<Instant>,
    next_ping_at: Option<Instant>,
    last_seen: Option<Instant>,
    /// Timestamp of the most recent unanswered ping
    outstanding: Option<u64>,
    rtt: Option<Duration>,
}

impl Heartbeat {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            epoch: None,
            next_ping_at: None,
            last_seen: None,
            outstanding: None,
            rtt: None,
        }
    }

    /// Begin pinging; the first ping is due one interval from now
    pub fn start(&mut self, now: Instant) {
        self.epoch = Some(now);
        self.next_ping_at = Some(now + self.interval);
        self.last_seen = Some(now);
        self.outstanding = None;
        debug!("Heartbeat started ({:?} interval)", self.interval);
    }

    /// Stop pinging and forget outstanding state
    pub fn stop(&mut self) {
        self.next_ping_at = None;
        self.outstanding = None;
    }

    /// Stop and forget the last round-trip measurement
    pub fn reset(&mut self) {
        self.stop();
        self.rtt = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_ping_at.is_some()
    }

    /// An inbound ping from the partner
    pub fn on_ping(&mut self, now: Instant) {
        self.last_seen = Some(now);
    }

    /// A pong from the partner
    ///
    /// Only a pong echoing our latest ping updates the round-trip estimate,
    /// but any pong proves the partner is alive.
    pub fn on_pong(&mut self, timestamp: u64, now: Instant) {
        self.last_seen = Some(now);
        let Some(epoch) = self.epoch else {
            return;
        };
        if self.outstanding == Some(timestamp) {
            self.outstanding = None;
            let sent = epoch + Duration::from_millis(timestamp);
            let rtt = now.saturating_duration_since(sent);
            self.rtt = Some(rtt);
            trace!("Heartbeat RTT {:?}", rtt);
        }
    }

    /// Last measured round-trip time
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    /// Earliest moment [`Heartbeat::poll`] has something to do
    pub fn next_deadline(&self) -> Option<Instant> {
        let next_ping = self.next_ping_at?;
        let last_seen = self.last_seen?;
        Some(next_ping.min(last_seen + self.timeout))
    }

    /// Advance to `now`
    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        let (Some(next_ping), Some(last_seen), Some(epoch)) =
            (self.next_ping_at, self.last_seen, self.epoch)
        else {
            return HeartbeatAction::Idle;
        };

        if now >= last_seen + self.timeout {
            debug!(
                "Heartbeat timed out after {:?} of silence",
                now.saturating_duration_since(last_seen)
            );
            self.stop();
            return HeartbeatAction::TimedOut;
        }

        if now >= next_ping {
            let timestamp = now.saturating_duration_since(epoch).as_millis() as u64;
            self.outstanding = Some(timestamp);
            self.next_ping_at = Some(now + self.interval);
            return HeartbeatAction::SendPing(timestamp);
        }

        HeartbeatAction::Idle
    }
}
