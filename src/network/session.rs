//! Session manager
//!
//! Owns the peer, the data channel and every timer of one session, and
//! drives them as a synchronous state machine. The manager never sleeps and
//! never spawns: callers feed it [`TransportEvent`]s and the current time,
//! and call [`SessionManager::handle_timeout`] once
//! [`SessionManager::next_deadline`] has passed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::protocol::{
    AuthFailureReason, Envelope, GameState, Message, StandardRules, WordRules,
};

use super::access::{AuthDecision, PinGuard};
use super::code::{is_valid_pin, SessionCode};
use super::config::SessionConfig;
use super::context::{
    ChannelState, ConnectionContext, ConnectionStatus, PendingSuggestion, Role, SessionSnapshot,
};
use super::error::{SessionError, TransportError};
use super::liveness::HeartbeatAction;
use super::reliability::ack_reply;
use super::transport::{ChannelId, Peer, PeerFactory, PeerId, TransportEvent};

/// Host's verdict on a suggestion, as seen by the viewer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestionResponse {
    pub word: String,
    pub accepted: bool,
}

/// Callback for game state received by the viewer
pub type GameStateCallback = Box<dyn Fn(&GameState) + Send + Sync>;

/// Callback for suggestion verdicts received by the viewer
pub type SuggestionCallback = Box<dyn Fn(&SuggestionResponse) + Send + Sync>;

/// P2P session state machine for one client
pub struct SessionManager<F: PeerFactory> {
    config: SessionConfig,
    factory: F,
    rules: Arc<dyn WordRules>,
    ctx: ConnectionContext<F::Peer>,
    /// Local id reused across reconnection attempts of one join
    viewer_id: Option<PeerId>,
    game_state_callback: Option<Arc<GameStateCallback>>,
    suggestion_callback: Option<Arc<SuggestionCallback>>,
}

impl<F: PeerFactory> SessionManager<F> {
    /// Create a manager using the standard word rules
    pub fn new(config: SessionConfig, factory: F) -> Self {
        Self::with_rules(config, factory, Arc::new(StandardRules))
    }

    pub fn with_rules(config: SessionConfig, factory: F, rules: Arc<dyn WordRules>) -> Self {
        let ctx = ConnectionContext::new(&config);
        Self {
            config,
            factory,
            rules,
            ctx,
            viewer_id: None,
            game_state_callback: None,
            suggestion_callback: None,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start hosting a new session
    ///
    /// Any previous session is torn down first. Registration completes
    /// asynchronously; the code is usable as soon as it is returned.
    pub fn host_game(
        &mut self,
        pin: Option<&str>,
        now: Instant,
    ) -> Result<SessionCode, SessionError> {
        let pin = normalize_pin(pin)?;

        self.ctx.cleanup();
        self.ctx.reset_session();
        self.ctx.join_limiter.reset();
        self.viewer_id = None;

        self.ctx.pin_guard = PinGuard::new(
            pin.clone(),
            self.config.max_failed_auth_attempts,
            self.config.auth_block_duration,
        );
        self.ctx.role = Role::Host;
        self.ctx.pin = pin;
        self.ctx.status = ConnectionStatus::Connecting;

        let code = SessionCode::generate();
        self.ctx.code = Some(code.clone());
        info!(
            "Hosting session {} ({})",
            code,
            if self.ctx.pin_guard.requires_pin() {
                "PIN required"
            } else {
                "open"
            }
        );

        self.open_host_peer()?;
        self.ctx.code.clone().ok_or(SessionError::NotConnected)
    }

    /// Join an existing session
    ///
    /// Refused locally, before any transport work, while the join rate
    /// limit is engaged.
    pub fn join_game(
        &mut self,
        code: &str,
        pin: Option<&str>,
        now: Instant,
    ) -> Result<(), SessionError> {
        let code: SessionCode = code.parse()?;
        let pin = normalize_pin(pin)?;

        if let Err(retry_after) = self.ctx.join_limiter.try_acquire(now) {
            let err = SessionError::RateLimited { retry_after };
            self.ctx.cleanup();
            self.ctx.reset_session();
            self.ctx.status = ConnectionStatus::Error;
            self.ctx.error_message = Some(err.to_string());
            return Err(err);
        }

        self.ctx.cleanup();
        self.ctx.reset_session();
        self.ctx.role = Role::Viewer;
        self.ctx.pin = pin;
        info!("Joining session {}", code);
        self.ctx.code = Some(code);
        self.viewer_id = Some(PeerId::random(&self.config.namespace));

        self.connect_viewer(now);
        Ok(())
    }

    /// Tear everything down and return to the idle state
    pub fn leave_session(&mut self) {
        if self.ctx.role != Role::None {
            info!("Leaving session");
        }
        self.ctx.cleanup();
        self.ctx.reset_session();
        self.ctx.join_limiter.reset();
        self.viewer_id = None;
    }

    // ------------------------------------------------------------------
    // Game operations
    // ------------------------------------------------------------------

    /// Publish the host's full state; only a redacted copy goes on the wire
    ///
    /// The state is cached and replayed when a viewer asks for it.
    pub fn send_game_state(&mut self, state: GameState, now: Instant) -> Result<(), SessionError> {
        if self.ctx.role != Role::Host {
            return Err(SessionError::WrongRole);
        }

        let redacted = state.redacted();
        self.ctx.last_state = Some(state);
        if self.ctx.is_authenticated() {
            self.send(Message::GameState { state: redacted }, true, now);
        }
        Ok(())
    }

    /// Propose a word to the host
    pub fn send_suggestion(&mut self, word: &str, now: Instant) -> Result<(), SessionError> {
        if self.ctx.role != Role::Viewer {
            return Err(SessionError::WrongRole);
        }
        if !self.ctx.is_authenticated() {
            return Err(SessionError::NotConnected);
        }

        let word = word.trim().to_ascii_uppercase();
        if !self.rules.is_valid_word(&word) {
            return Err(SessionError::InvalidWord);
        }

        debug!("Suggesting {}", word);
        self.send(Message::SuggestWord { word }, true, now);
        Ok(())
    }

    /// Withdraw the current suggestion
    pub fn clear_suggestion(&mut self, now: Instant) -> Result<(), SessionError> {
        if self.ctx.role != Role::Viewer {
            return Err(SessionError::WrongRole);
        }
        if !self.ctx.is_authenticated() {
            return Err(SessionError::NotConnected);
        }

        self.send(Message::ClearSuggestion, false, now);
        Ok(())
    }

    /// Accept the pending suggestion, returning the word to apply
    pub fn accept_suggestion(&mut self, now: Instant) -> Option<String> {
        self.resolve_suggestion(true, now)
    }

    /// Reject the pending suggestion
    pub fn reject_suggestion(&mut self, now: Instant) {
        self.resolve_suggestion(false, now);
    }

    fn resolve_suggestion(&mut self, accepted: bool, now: Instant) -> Option<String> {
        if self.ctx.role != Role::Host {
            return None;
        }
        let PendingSuggestion { word } = self.ctx.pending_suggestion.take()?;

        info!(
            "Suggestion {} {}",
            word,
            if accepted { "accepted" } else { "rejected" }
        );
        let message = if accepted {
            Message::SuggestionAccepted { word: word.clone() }
        } else {
            Message::SuggestionRejected { word: word.clone() }
        };
        if self.ctx.is_authenticated() {
            self.send(message, true, now);
        }
        Some(word)
    }

    /// Set callback for game state received from the host
    pub fn on_game_state_received<C>(&mut self, callback: C)
    where
        C: Fn(&GameState) + Send + Sync + 'static,
    {
        self.game_state_callback = Some(Arc::new(Box::new(callback)));
    }

    /// Set callback for the host's verdict on a suggestion
    pub fn on_suggestion_response<C>(&mut self, callback: C)
    where
        C: Fn(&SuggestionResponse) + Send + Sync + 'static,
    {
        self.suggestion_callback = Some(Arc::new(Box::new(callback)));
    }

    // ------------------------------------------------------------------
    // Observable state
    // ------------------------------------------------------------------

    pub fn role(&self) -> Role {
        self.ctx.role
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.ctx.status
    }

    pub fn session_code(&self) -> Option<&SessionCode> {
        self.ctx.code.as_ref()
    }

    pub fn session_pin(&self) -> Option<&str> {
        self.ctx.pin.as_deref()
    }

    pub fn partner_present(&self) -> bool {
        self.ctx.partner_present
    }

    pub fn pending_suggestion(&self) -> Option<&str> {
        self.ctx.pending_suggestion.as_ref().map(|s| s.word.as_str())
    }

    pub fn error_message(&self) -> Option<&str> {
        self.ctx.error_message.as_deref()
    }

    pub fn status_message(&self) -> Option<&str> {
        self.ctx.status_message.as_deref()
    }

    /// Last heartbeat round-trip time
    pub fn rtt(&self) -> Option<Duration> {
        self.ctx.heartbeat.rtt()
    }

    /// Critical messages still awaiting acknowledgment
    pub fn pending_acks(&self) -> usize {
        self.ctx.acks.pending_count()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.ctx.snapshot()
    }

    /// Earliest moment [`SessionManager::handle_timeout`] has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        self.ctx.next_deadline()
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Run every timer that is due at `now`
    pub fn handle_timeout(&mut self, now: Instant) {
        if self.ctx.collision_retry_at.is_some_and(|at| at <= now) {
            self.ctx.collision_retry_at = None;
            debug!("Retrying host registration");
            // Failure is already recorded in the context
            let _ = self.open_host_peer();
        }

        if self.ctx.connect_deadline.is_some_and(|at| at <= now) {
            self.ctx.connect_deadline = None;
            warn!("Timed out connecting to host");
            self.on_link_lost("connect timeout", now);
        }

        if self.ctx.reconnect.take_due(now) {
            self.connect_viewer(now);
        }

        if self.ctx.is_authenticated() {
            match self.ctx.heartbeat.poll(now) {
                HeartbeatAction::Idle => {}
                HeartbeatAction::SendPing(timestamp) => {
                    self.send(Message::Ping { timestamp }, false, now);
                }
                HeartbeatAction::TimedOut => {
                    warn!("Partner stopped responding");
                    self.on_link_lost("heartbeat timeout", now);
                }
            }
        }

        let exhausted = match (self.ctx.peer.as_mut(), self.ctx.channel.as_ref()) {
            (Some(peer), Some(channel)) => self.ctx.acks.poll(peer, channel.id, now),
            _ => Vec::new(),
        };
        if !exhausted.is_empty() {
            self.on_link_lost("message unacknowledged", now);
        }
    }

    // ------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------

    /// Apply one event reported by the transport
    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        if !self.ctx.is_current_peer(event.peer()) {
            debug!("Ignoring event for stale peer {}", event.peer());
            return;
        }

        match event {
            TransportEvent::PeerOpen { .. } => self.on_peer_open(now),
            TransportEvent::PeerError { error, .. } => self.on_peer_error(error, now),
            TransportEvent::ChannelIncoming {
                channel, remote, ..
            } => self.on_channel_incoming(channel, remote, now),
            TransportEvent::ChannelOpen { channel, .. } => self.on_channel_open(channel, now),
            TransportEvent::Data {
                channel, payload, ..
            } => self.on_data(channel, &payload, now),
            TransportEvent::ChannelClosed { channel, .. } => {
                if self.ctx.is_current_channel(channel) {
                    info!("Channel closed by partner");
                    self.on_link_lost("channel closed", now);
                }
            }
        }
    }

    fn on_peer_open(&mut self, now: Instant) {
        match self.ctx.role {
            Role::Host => {
                self.ctx.status = ConnectionStatus::Connected;
                if let Some(code) = &self.ctx.code {
                    info!("Session {} registered, waiting for viewer", code);
                }
            }
            Role::Viewer => {
                if self.ctx.channel.is_some() {
                    return;
                }
                let Some(host) = self
                    .ctx
                    .code
                    .as_ref()
                    .map(|c| c.rendezvous_id(&self.config.namespace))
                else {
                    return;
                };
                let Some(peer) = self.ctx.peer.as_mut() else {
                    return;
                };

                debug!("Connecting to {}", host);
                match peer.connect(&host) {
                    Ok(channel) => {
                        self.ctx.channel = Some(ChannelState::new(channel, Some(host)));
                    }
                    Err(e) => {
                        warn!("Failed to open channel: {}", e);
                        self.on_link_lost("connect failed", now);
                    }
                }
            }
            Role::None => {}
        }
    }

    fn on_peer_error(&mut self, error: TransportError, now: Instant) {
        match (self.ctx.role, &error) {
            (Role::Host, TransportError::IdTaken(_)) => {
                // Expected now and then; pick another code quietly
                debug!("Session code collision, regenerating");
                if let Some(mut peer) = self.ctx.peer.take() {
                    peer.destroy();
                }
                self.ctx.code = Some(SessionCode::generate());
                self.ctx.collision_retry_at = Some(now + self.config.collision_retry_delay);
            }
            (Role::Host, _) => {
                warn!("Host transport error: {}", error);
                self.fail(SessionError::Transport(error.to_string()));
            }
            (Role::Viewer, TransportError::PeerUnavailable(_))
                if !self.ctx.reconnect.is_reconnecting() =>
            {
                warn!("No session behind code: {}", error);
                self.fail(SessionError::SessionNotFound);
            }
            (Role::Viewer, _) => {
                warn!("Viewer transport error: {}", error);
                self.on_link_lost("transport error", now);
            }
            (Role::None, _) => {}
        }
    }

    fn on_channel_incoming(&mut self, channel: ChannelId, remote: PeerId, now: Instant) {
        if self.ctx.role != Role::Host {
            debug!("Refusing unexpected inbound channel from {}", remote);
            if let Some(peer) = self.ctx.peer.as_mut() {
                peer.close_channel(channel);
            }
            return;
        }

        if self.ctx.pin_guard.blocked_until(&remote, now).is_some() {
            warn!("Refusing channel from blocked peer {}", remote);
            if let Some(peer) = self.ctx.peer.as_mut() {
                peer.close_channel(channel);
            }
            return;
        }

        if self.ctx.channel.is_some() {
            info!("New viewer {} supersedes the previous one", remote);
            self.ctx.close_channel();
        }

        info!("Viewer {} connecting", remote);
        self.ctx.channel = Some(ChannelState::new(channel, Some(remote)));
    }

    fn on_channel_open(&mut self, channel: ChannelId, now: Instant) {
        let Some(state) = self.ctx.channel.as_mut().filter(|c| c.id == channel) else {
            return;
        };
        state.open = true;
        debug!("Channel {} open", channel);

        if self.ctx.role == Role::Viewer {
            let pin = self.ctx.pin.clone();
            self.send(Message::AuthRequest { pin }, false, now);
        }
    }

    fn on_data(&mut self, channel: ChannelId, payload: &str, now: Instant) {
        if !self.ctx.is_current_channel(channel) {
            debug!("Ignoring data on stale channel {}", channel);
            return;
        }

        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping invalid message: {}", e);
                return;
            }
        };

        if !self.ctx.is_authenticated() {
            if envelope.message.is_auth() {
                self.on_auth_message(envelope.message, now);
            } else {
                debug!(
                    "Dropping {} received before authentication",
                    envelope.message.kind()
                );
            }
            return;
        }

        if let Some(ack) = ack_reply(&envelope) {
            self.send(ack, false, now);
        }
        if let Some(id) = envelope.message_id.as_deref() {
            if envelope.message.is_critical() && !self.ctx.acks.mark_received(id) {
                debug!("Duplicate {} ({})", envelope.message.kind(), id);
                return;
            }
        }

        match (self.ctx.role, envelope.message) {
            (_, Message::Ack { id }) => {
                self.ctx.acks.on_ack(&id);
            }
            (_, Message::Ping { timestamp }) => {
                self.ctx.heartbeat.on_ping(now);
                self.send(Message::Pong { timestamp }, false, now);
            }
            (_, Message::Pong { timestamp }) => {
                self.ctx.heartbeat.on_pong(timestamp, now);
            }
            (_, message) if message.is_auth() => self.on_auth_message(message, now),

            (Role::Host, Message::RequestState) => {
                if let Some(state) = self.ctx.last_state.as_ref().map(GameState::redacted) {
                    self.send(Message::GameState { state }, true, now);
                }
            }
            (Role::Host, Message::SuggestWord { word }) => {
                let word = word.to_ascii_uppercase();
                if self.rules.is_valid_word(&word) {
                    info!("Viewer suggests {}", word);
                    self.ctx.pending_suggestion = Some(PendingSuggestion { word });
                } else {
                    warn!("Dropping suggestion of invalid word {}", word);
                }
            }
            (Role::Host, Message::ClearSuggestion) => {
                self.ctx.pending_suggestion = None;
            }

            (Role::Viewer, Message::GameState { state }) => {
                if let Some(callback) = &self.game_state_callback {
                    callback(&state);
                }
            }
            (Role::Viewer, Message::SuggestionAccepted { word }) => {
                self.notify_suggestion(SuggestionResponse {
                    word,
                    accepted: true,
                });
            }
            (Role::Viewer, Message::SuggestionRejected { word }) => {
                self.notify_suggestion(SuggestionResponse {
                    word,
                    accepted: false,
                });
            }

            (role, message) => {
                debug!("Ignoring {} as {:?}", message.kind(), role);
            }
        }
    }

    fn notify_suggestion(&self, response: SuggestionResponse) {
        if let Some(callback) = &self.suggestion_callback {
            callback(&response);
        }
    }

    fn on_auth_message(&mut self, message: Message, now: Instant) {
        match (self.ctx.role, message) {
            (Role::Host, Message::AuthRequest { pin }) => self.on_auth_request(pin, now),
            (Role::Viewer, Message::AuthSuccess) => {
                if self.ctx.is_authenticated() {
                    return;
                }
                if let Some(channel) = self.ctx.channel.as_mut() {
                    channel.authenticated = true;
                }
                self.ctx.status = ConnectionStatus::Connected;
                self.ctx.partner_present = true;
                self.ctx.status_message = None;
                self.ctx.error_message = None;
                self.ctx.connect_deadline = None;
                self.ctx.reconnect.reset();
                self.ctx.heartbeat.start(now);
                info!("Connected to host");

                self.send(Message::RequestState, true, now);
            }
            (Role::Viewer, Message::AuthFailure { reason }) => {
                warn!("Host refused authentication: {:?}", reason);
                self.fail(match reason {
                    AuthFailureReason::InvalidPin => SessionError::AuthFailed,
                    AuthFailureReason::Blocked => SessionError::AuthBlocked,
                });
            }
            (role, message) => {
                debug!("Ignoring {} as {:?}", message.kind(), role);
            }
        }
    }

    fn on_auth_request(&mut self, pin: Option<String>, now: Instant) {
        let Some(remote) = self.ctx.channel.as_ref().and_then(|c| c.remote.clone()) else {
            return;
        };

        // The channel is already trusted; repeat the verdict without re-checking
        if self.ctx.is_authenticated() {
            debug!("Repeated auth-request from {}", remote);
            self.send(Message::AuthSuccess, false, now);
            return;
        }

        match self.ctx.pin_guard.check(&remote, pin.as_deref(), now) {
            AuthDecision::Approved => {
                self.send(Message::AuthSuccess, false, now);
                if let Some(channel) = self.ctx.channel.as_mut() {
                    channel.authenticated = true;
                }
                self.ctx.partner_present = true;
                self.ctx.heartbeat.start(now);
                info!("Viewer {} joined", remote);
            }
            AuthDecision::Rejected { blocked } => {
                let reason = if blocked {
                    AuthFailureReason::Blocked
                } else {
                    AuthFailureReason::InvalidPin
                };
                self.send(Message::AuthFailure { reason }, false, now);
                self.ctx.partner_present = false;
                if blocked {
                    self.ctx.close_channel();
                }
            }
            AuthDecision::Blocked { .. } => {
                self.send(
                    Message::AuthFailure {
                        reason: AuthFailureReason::Blocked,
                    },
                    false,
                    now,
                );
                self.ctx.close_channel();
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn open_host_peer(&mut self) -> Result<(), SessionError> {
        let Some(id) = self
            .ctx
            .code
            .as_ref()
            .map(|c| c.rendezvous_id(&self.config.namespace))
        else {
            return Err(SessionError::NotConnected);
        };

        match self.factory.create(&id) {
            Ok(peer) => {
                self.ctx.peer = Some(peer);
                Ok(())
            }
            Err(e) => {
                let err = SessionError::Transport(e.to_string());
                warn!("Failed to register {}: {}", id, e);
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    fn connect_viewer(&mut self, now: Instant) {
        let Some(id) = self.viewer_id.clone() else {
            return;
        };

        self.ctx.status = ConnectionStatus::Connecting;
        self.ctx.partner_present = false;

        match self.factory.create(&id) {
            Ok(peer) => {
                self.ctx.peer = Some(peer);
                self.ctx.connect_deadline = Some(now + self.config.connect_timeout);
            }
            Err(e) => {
                warn!("Failed to create peer: {}", e);
                self.on_link_lost("peer creation failed", now);
            }
        }
    }

    /// Common recovery path for every kind of connection loss
    fn on_link_lost(&mut self, reason: &str, now: Instant) {
        match self.ctx.role {
            Role::Host => {
                info!("Viewer lost ({}), waiting for rejoin", reason);
                self.ctx.close_channel();
            }
            Role::Viewer => {
                info!("Connection lost ({})", reason);
                self.ctx.cleanup();
                match self.ctx.reconnect.schedule(now) {
                    Some(delay) => {
                        self.ctx.status = ConnectionStatus::Connecting;
                        self.ctx.status_message = Some(format!(
                            "Reconnecting in {}s (attempt {}/{})...",
                            delay.as_secs().max(1),
                            self.ctx.reconnect.attempt(),
                            self.config.reconnect_max_attempts
                        ));
                    }
                    None => self.fail(SessionError::ReconnectExhausted),
                }
            }
            Role::None => {}
        }
    }

    /// Terminal failure: tear down and surface the fixed message
    fn fail(&mut self, err: SessionError) {
        self.ctx.cleanup();
        self.ctx.status = ConnectionStatus::Error;
        self.ctx.error_message = Some(err.to_string());
        self.ctx.status_message = None;
    }

    fn send(&mut self, message: Message, require_ack: bool, now: Instant) {
        let (Some(peer), Some(channel)) = (self.ctx.peer.as_mut(), self.ctx.channel.as_ref())
        else {
            debug!("No channel, dropping {}", message.kind());
            return;
        };
        if let Err(e) = self
            .ctx
            .acks
            .send(peer, channel.id, message, require_ack, now)
        {
            warn!("Failed to encode message: {}", e);
        }
    }
}

/// Treat an empty PIN as none and validate the rest
fn normalize_pin(pin: Option<&str>) -> Result<Option<String>, SessionError> {
    match pin.map(str::trim) {
        None | Some("") => Ok(None),
        Some(pin) if is_valid_pin(pin) => Ok(Some(pin.to_string())),
        Some(_) => Err(SessionError::InvalidPin),
    }
}
