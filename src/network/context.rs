//! Connection context: the single owned record of one session
//!
//! Everything a session needs to tear itself down lives here: the peer
//! handle, the one data channel, and every deadline. [`ConnectionContext::cleanup`]
//! clears all of it synchronously, so nothing can fire after teardown.

use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use crate::protocol::GameState;

use super::access::{JoinRateLimiter, PinGuard};
use super::code::SessionCode;
use super::config::SessionConfig;
use super::liveness::Heartbeat;
use super::reconnect::ReconnectController;
use super::reliability::AckTracker;
use super::transport::{ChannelId, Peer, PeerId};

/// Which side of the session this client plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    None,
    Host,
    Viewer,
}

/// Connection state
///
/// ```text
/// [*] --> Disconnected
/// Disconnected --> Connecting: host_game() / join_game()
/// Connecting --> Connected: registered (host) / authenticated (viewer)
/// Connecting --> Error: terminal failure
/// Connected --> Connecting: link lost, reconnect scheduled (viewer)
/// Connecting --> Error: reconnect budget exhausted
/// * --> Disconnected: leave_session()
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// A word proposed by the viewer, awaiting the host's decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingSuggestion {
    pub word: String,
}

/// The single live data channel
#[derive(Debug, Clone)]
pub(crate) struct ChannelState {
    pub id: ChannelId,
    pub remote: Option<PeerId>,
    pub open: bool,
    pub authenticated: bool,
}

impl ChannelState {
    pub fn new(id: ChannelId, remote: Option<PeerId>) -> Self {
        Self {
            id,
            remote,
            open: false,
            authenticated: false,
        }
    }
}

/// Serializable view of the observable session fields
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub role: Role,
    pub connection_status: ConnectionStatus,
    pub error_message: Option<String>,
    pub status_message: Option<String>,
    pub partner_present: bool,
    pub pending_suggestion: Option<String>,
    pub session_code: Option<String>,
    pub session_pin: Option<String>,
    pub rtt_ms: Option<u64>,
    pub reconnect_attempt: u32,
}

pub(crate) struct ConnectionContext<P: Peer> {
    pub role: Role,
    pub code: Option<SessionCode>,
    pub status: ConnectionStatus,
    pub partner_present: bool,
    pub pending_suggestion: Option<PendingSuggestion>,
    pub pin: Option<String>,
    pub error_message: Option<String>,
    pub status_message: Option<String>,
    /// Last full state handed over by the host application
    pub last_state: Option<GameState>,

    pub peer: Option<P>,
    pub channel: Option<ChannelState>,

    pub acks: AckTracker,
    pub heartbeat: Heartbeat,
    pub reconnect: ReconnectController,
    pub pin_guard: PinGuard,
    pub join_limiter: JoinRateLimiter,

    pub collision_retry_at: Option<Instant>,
    pub connect_deadline: Option<Instant>,
}

impl<P: Peer> ConnectionContext<P> {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            role: Role::None,
            code: None,
            status: ConnectionStatus::Disconnected,
            partner_present: false,
            pending_suggestion: None,
            pin: None,
            error_message: None,
            status_message: None,
            last_state: None,
            peer: None,
            channel: None,
            acks: AckTracker::new(config.ack_timeout, config.max_retries),
            heartbeat: Heartbeat::new(config.heartbeat_interval, config.heartbeat_timeout),
            reconnect: ReconnectController::new(
                config.reconnect_initial_delay,
                config.reconnect_max_delay,
                config.reconnect_max_attempts,
            ),
            pin_guard: PinGuard::new(
                None,
                config.max_failed_auth_attempts,
                config.auth_block_duration,
            ),
            join_limiter: JoinRateLimiter::new(
                config.join_rate_limit_max,
                config.join_rate_limit_window,
                config.join_cooldown,
            ),
            collision_retry_at: None,
            connect_deadline: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.authenticated)
    }

    pub fn is_current_channel(&self, channel: ChannelId) -> bool {
        self.channel.as_ref().is_some_and(|c| c.id == channel)
    }

    /// Whether an event tagged with `peer` belongs to the live peer
    pub fn is_current_peer(&self, peer: &PeerId) -> bool {
        self.peer.as_ref().is_some_and(|p| p.id() == peer)
    }

    /// Close the data channel and forget everything tied to it
    pub fn close_channel(&mut self) {
        if let Some(channel) = self.channel.take() {
            debug!("Closing channel {}", channel.id);
            if let Some(peer) = self.peer.as_mut() {
                peer.close_channel(channel.id);
            }
        }
        self.partner_present = false;
        self.pending_suggestion = None;
        self.acks.clear();
        self.heartbeat.stop();
    }

    /// Release every transport handle and clear every deadline
    pub fn cleanup(&mut self) {
        self.close_channel();
        if let Some(mut peer) = self.peer.take() {
            debug!("Destroying peer {}", peer.id());
            peer.destroy();
        }
        self.collision_retry_at = None;
        self.connect_deadline = None;
        self.reconnect.cancel();
    }

    /// Reset observable session fields to their pre-session values
    pub fn reset_session(&mut self) {
        self.role = Role::None;
        self.code = None;
        self.status = ConnectionStatus::Disconnected;
        self.partner_present = false;
        self.pending_suggestion = None;
        self.pin = None;
        self.error_message = None;
        self.status_message = None;
        self.last_state = None;
        self.heartbeat.reset();
        self.reconnect.reset();
        self.pin_guard.reset();
    }

    /// Earliest pending deadline of any kind
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.collision_retry_at,
            self.connect_deadline,
            self.reconnect.next_deadline(),
            self.heartbeat.next_deadline(),
            self.acks.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            role: self.role,
            connection_status: self.status,
            error_message: self.error_message.clone(),
            status_message: self.status_message.clone(),
            partner_present: self.partner_present,
            pending_suggestion: self.pending_suggestion.as_ref().map(|s| s.word.clone()),
            session_code: self.code.as_ref().map(|c| c.to_string()),
            session_pin: self.pin.clone(),
            rtt_ms: self.heartbeat.rtt().map(|d| d.as_millis() as u64),
            reconnect_attempt: self.reconnect.attempt(),
        }
    }
}
