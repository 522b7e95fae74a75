//! Session behavior tests
//!
//! A host and a viewer talk over the in-memory network. Time is simulated:
//! the harness jumps straight to each pending deadline, so minutes of
//! backoff run instantly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use wordlink::network::{
    ChannelId, ConnectionStatus, MemoryNetwork, MemoryPeer, MemoryPeerFactory, Peer, PeerFactory,
    PeerId, Role, SessionCode, SessionConfig, SessionError, SessionManager, SessionSnapshot,
    SuggestionResponse, TransportEvent,
};
use wordlink::protocol::{AuthFailureReason, Envelope, GameState, LetterStatus, Message};

type Manager = SessionManager<MemoryPeerFactory>;

/// One session manager and its event queue
struct Side {
    manager: Manager,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Side {
    fn new(network: &MemoryNetwork) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        Self {
            manager: SessionManager::new(SessionConfig::default(), network.factory(tx)),
            events,
        }
    }

    fn pump(&mut self, now: Instant) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.manager.handle_transport_event(event, now);
            handled += 1;
        }
        handled
    }
}

struct Harness {
    network: MemoryNetwork,
    host: Side,
    viewer: Side,
    others: Vec<Side>,
    now: Instant,
    states: Arc<Mutex<Vec<GameState>>>,
    responses: Arc<Mutex<Vec<SuggestionResponse>>>,
}

impl Harness {
    fn new() -> Self {
        let network = MemoryNetwork::new();
        let host = Side::new(&network);
        let mut viewer = Side::new(&network);

        let states = Arc::new(Mutex::new(Vec::new()));
        let responses = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        viewer
            .manager
            .on_game_state_received(move |state| sink.lock().push(state.clone()));
        let sink = responses.clone();
        viewer
            .manager
            .on_suggestion_response(move |response| sink.lock().push(response.clone()));

        Self {
            network,
            host,
            viewer,
            others: Vec::new(),
            now: Instant::now(),
            states,
            responses,
        }
    }

    fn sides(&mut self) -> impl Iterator<Item = &mut Side> {
        [&mut self.host, &mut self.viewer]
            .into_iter()
            .chain(self.others.iter_mut())
    }

    /// Deliver queued events until every side is quiet
    fn pump(&mut self) {
        let now = self.now;
        loop {
            let handled: usize = self.sides().map(|side| side.pump(now)).sum();
            if handled == 0 {
                break;
            }
        }
    }

    /// Advance simulated time, firing every deadline on the way
    fn advance(&mut self, by: Duration) {
        let until = self.now + by;
        for _ in 0..10_000 {
            self.pump();
            let next = self
                .sides()
                .filter_map(|side| side.manager.next_deadline())
                .min();
            match next {
                Some(at) if at <= until => {
                    self.now = self.now.max(at);
                    let now = self.now;
                    for side in self.sides() {
                        side.manager.handle_timeout(now);
                    }
                }
                _ => break,
            }
        }
        self.now = until;
        self.pump();
    }

    /// Host a game and join it
    fn connect(&mut self, host_pin: Option<&str>, viewer_pin: Option<&str>) -> SessionCode {
        let now = self.now;
        let code = self.host.manager.host_game(host_pin, now).unwrap();
        self.host
            .manager
            .send_game_state(GameState::new("CRANE"), now)
            .unwrap();
        self.viewer
            .manager
            .join_game(&code.to_string(), viewer_pin, now)
            .unwrap();
        self.pump();
        code
    }

    fn state_count(&self) -> usize {
        self.states.lock().len()
    }
}

/// A bare transport peer speaking raw protocol frames
struct RawPeer {
    peer: MemoryPeer,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl RawPeer {
    fn new(network: &MemoryNetwork, id: &str) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let peer = network.factory(tx).create(&PeerId::new(id)).unwrap();
        Self { peer, events }
    }

    fn send(&mut self, channel: ChannelId, message: Message) {
        let frame = Envelope::new(message).encode().unwrap();
        self.peer.send(channel, &frame).unwrap();
    }

    fn drain(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Messages among drained events
    fn messages(events: &[TransportEvent]) -> Vec<Message> {
        events
            .iter()
            .filter_map(|event| match event {
                TransportEvent::Data { payload, .. } => Envelope::decode(payload).ok(),
                _ => None,
            })
            .map(|envelope| envelope.message)
            .collect()
    }

    fn was_closed(events: &[TransportEvent], channel: ChannelId) -> bool {
        events.iter().any(|event| {
            matches!(event, TransportEvent::ChannelClosed { channel: c, .. } if *c == channel)
        })
    }
}

fn invalid_pin() -> Message {
    Message::AuthFailure {
        reason: AuthFailureReason::InvalidPin,
    }
}

// ----------------------------------------------------------------------
// Connection and authentication
// ----------------------------------------------------------------------

/// Test: Open session handshake
/// Given a host without a PIN that has published its game state
/// When a viewer joins with the code
/// Then within one pump both sides see their partner and the viewer has the state
#[test]
fn test_viewer_joins_open_session() {
    let mut h = Harness::new();
    h.connect(None, None);

    assert_eq!(h.host.manager.connection_status(), ConnectionStatus::Connected);
    assert_eq!(h.viewer.manager.connection_status(), ConnectionStatus::Connected);
    assert!(h.host.manager.partner_present());
    assert!(h.viewer.manager.partner_present());

    let states = h.states.lock();
    assert_eq!(states.len(), 1);
    assert!(states[0].solution.is_none());
}

/// Test: Game state is redacted
/// Given a connected session
/// When the host sends a state containing the solution
/// Then the viewer receives the same state without the solution
#[test]
fn test_game_state_is_redacted() {
    let mut h = Harness::new();
    h.connect(None, None);

    let mut state = GameState::new("CRANE");
    state.guesses.push("SLATE".into());
    state.evaluations.push(vec![
        LetterStatus::Absent,
        LetterStatus::Absent,
        LetterStatus::Correct,
        LetterStatus::Absent,
        LetterStatus::Correct,
    ]);
    state.current_guess = "CR".into();

    let now = h.now;
    h.host.manager.send_game_state(state.clone(), now).unwrap();
    h.pump();

    let received = h.states.lock().last().cloned().unwrap();
    assert_eq!(received, state.redacted());
    assert!(received.solution.is_none());
    assert_eq!(h.host.manager.pending_acks(), 0);
}

/// Test: Correct PIN
/// Given a host requiring PIN 4321
/// When a viewer joins with PIN 4321
/// Then the viewer is authenticated
#[test]
fn test_correct_pin_authenticates() {
    let mut h = Harness::new();
    h.connect(Some("4321"), Some("4321"));

    assert!(h.host.manager.partner_present());
    assert_eq!(h.viewer.manager.connection_status(), ConnectionStatus::Connected);
    assert_eq!(h.host.manager.session_pin(), Some("4321"));
}

/// Test: Incorrect PIN is terminal
/// Given a host requiring PIN 4321
/// When a viewer joins with PIN 1111
/// Then the viewer ends in error and never retries
#[test]
fn test_incorrect_pin_is_terminal() {
    let mut h = Harness::new();
    h.connect(Some("4321"), Some("1111"));

    assert_eq!(h.viewer.manager.connection_status(), ConnectionStatus::Error);
    assert_eq!(h.viewer.manager.error_message(), Some("Incorrect PIN."));
    assert!(!h.host.manager.partner_present());
    assert!(!h.viewer.manager.partner_present());

    let created = h.network.peers_created();
    h.advance(Duration::from_secs(120));
    assert_eq!(h.network.peers_created(), created);
    assert_eq!(h.viewer.manager.next_deadline(), None);
}

/// Test: Missing PIN
/// Given a host requiring a PIN
/// When a viewer joins without one
/// Then authentication fails
#[test]
fn test_missing_pin_is_rejected() {
    let mut h = Harness::new();
    h.connect(Some("4321"), None);

    assert_eq!(h.viewer.manager.error_message(), Some("Incorrect PIN."));
    assert!(!h.host.manager.partner_present());
}

/// Test: Failures below the threshold
/// Given a host requiring PIN 4321
/// When a peer sends four wrong PINs and then the right one
/// Then the right one still succeeds
#[test]
fn test_correct_pin_after_failures_below_threshold() {
    let mut h = Harness::new();
    let now = h.now;
    let code = h.host.manager.host_game(Some("4321"), now).unwrap();
    h.pump();

    let mut raw = RawPeer::new(&h.network, "guesser");
    let channel = raw.peer.connect(&code.rendezvous_id("wordlink")).unwrap();
    h.pump();

    for _ in 0..4 {
        raw.send(channel, Message::AuthRequest { pin: Some("0000".into()) });
    }
    h.pump();
    let events = raw.drain();
    assert_eq!(RawPeer::messages(&events), vec![invalid_pin(); 4]);
    assert!(!h.host.manager.partner_present());

    raw.send(channel, Message::AuthRequest { pin: Some("4321".into()) });
    h.pump();
    assert_eq!(RawPeer::messages(&raw.drain()), vec![Message::AuthSuccess]);
    assert!(h.host.manager.partner_present());
}

/// Test: Brute force protection
/// Given a host requiring PIN 4321
/// When one peer sends five wrong PINs
/// Then it is blocked, even with the right PIN, until the cool-down ends
#[test]
fn test_repeated_failures_block_peer() {
    let mut h = Harness::new();
    let now = h.now;
    let code = h.host.manager.host_game(Some("4321"), now).unwrap();
    h.pump();
    let host_id = code.rendezvous_id("wordlink");

    let mut raw = RawPeer::new(&h.network, "attacker");
    let first = raw.peer.connect(&host_id).unwrap();
    h.pump();
    for _ in 0..5 {
        raw.send(first, Message::AuthRequest { pin: Some("0000".into()) });
    }
    h.pump();

    let events = raw.drain();
    let messages = RawPeer::messages(&events);
    assert_eq!(messages.len(), 5);
    assert_eq!(
        messages.last(),
        Some(&Message::AuthFailure {
            reason: AuthFailureReason::Blocked
        })
    );
    assert!(RawPeer::was_closed(&events, first));

    // A fresh channel from the blocked peer is refused outright
    let second = raw.peer.connect(&host_id).unwrap();
    h.pump();
    assert!(RawPeer::was_closed(&raw.drain(), second));
    assert!(!h.host.manager.partner_present());

    h.advance(Duration::from_secs(300));

    let third = raw.peer.connect(&host_id).unwrap();
    h.pump();
    raw.send(third, Message::AuthRequest { pin: Some("4321".into()) });
    h.pump();
    assert_eq!(RawPeer::messages(&raw.drain()), vec![Message::AuthSuccess]);
    assert!(h.host.manager.partner_present());
}

/// Test: Pre-authentication gating
/// Given a host requiring a PIN
/// When a peer sends garbage and game messages before authenticating
/// Then nothing is applied and nothing is answered
#[test]
fn test_messages_before_auth_are_dropped() {
    let mut h = Harness::new();
    let now = h.now;
    let code = h.host.manager.host_game(Some("4321"), now).unwrap();
    h.host
        .manager
        .send_game_state(GameState::new("CRANE"), now)
        .unwrap();
    h.pump();

    let mut raw = RawPeer::new(&h.network, "early");
    let channel = raw.peer.connect(&code.rendezvous_id("wordlink")).unwrap();
    h.pump();

    raw.peer.send(channel, "not json").unwrap();
    raw.peer.send(channel, r#"{"type":"launch-missiles"}"#).unwrap();
    raw.send(channel, Message::SuggestWord { word: "CRANE".into() });
    raw.send(channel, Message::RequestState);
    h.pump();

    assert_eq!(h.host.manager.pending_suggestion(), None);
    assert!(RawPeer::messages(&raw.drain()).is_empty());
    assert_eq!(h.host.manager.connection_status(), ConnectionStatus::Connected);
}

/// Test: Unknown session code
/// Given no host behind a code
/// When a viewer joins it
/// Then the viewer fails with "session not found" and does not retry
#[test]
fn test_unknown_code_is_terminal() {
    let mut h = Harness::new();
    let now = h.now;
    h.viewer
        .manager
        .join_game("ABCDEF-abcdef", None, now)
        .unwrap();
    h.pump();

    assert_eq!(h.viewer.manager.connection_status(), ConnectionStatus::Error);
    assert_eq!(
        h.viewer.manager.error_message(),
        Some("Session not found. Check the code and try again.")
    );
    assert_eq!(h.viewer.manager.next_deadline(), None);
}

/// Test: Second viewer supersedes the first
/// Given a connected session
/// When another viewer joins the same code
/// Then the host keeps only the new channel
#[test]
fn test_new_viewer_supersedes_previous() {
    let mut h = Harness::new();
    let code = h.connect(None, None);

    let mut second = Side::new(&h.network);
    second
        .manager
        .join_game(&code.to_string(), None, h.now)
        .unwrap();
    h.others.push(second);
    h.pump();

    assert!(h.host.manager.partner_present());
    assert_eq!(h.others[0].manager.connection_status(), ConnectionStatus::Connected);
    assert_eq!(
        h.viewer.manager.connection_status(),
        ConnectionStatus::Connecting
    );
    assert!(h.viewer.manager.status_message().is_some());
}

/// Test: Repeated auth-request on a trusted channel
/// Given a peer that authenticated with the right PIN
/// When it sends more auth-requests with a wrong PIN on the same channel
/// Then it stays authenticated and present, and keeps receiving state
#[test]
fn test_repeated_auth_request_keeps_channel_trusted() {
    let mut h = Harness::new();
    let now = h.now;
    let code = h.host.manager.host_game(Some("4321"), now).unwrap();
    h.pump();

    let mut raw = RawPeer::new(&h.network, "returning");
    let channel = raw.peer.connect(&code.rendezvous_id("wordlink")).unwrap();
    h.pump();
    raw.send(channel, Message::AuthRequest { pin: Some("4321".into()) });
    h.pump();
    assert!(h.host.manager.partner_present());

    for _ in 0..5 {
        raw.send(channel, Message::AuthRequest { pin: Some("0000".into()) });
    }
    h.pump();
    assert!(h.host.manager.partner_present());

    h.host
        .manager
        .send_game_state(GameState::new("CRANE"), now)
        .unwrap();
    h.pump();

    let messages = RawPeer::messages(&raw.drain());
    assert_eq!(messages.len(), 7);
    assert!(messages[..6].iter().all(|m| *m == Message::AuthSuccess));
    assert!(matches!(messages[6], Message::GameState { .. }));
}

/// Test: Blocked peer cannot displace the viewer
/// Given a connected viewer and a peer that got itself blocked
/// When the blocked peer opens another channel
/// Then it is refused and the viewer stays connected
#[test]
fn test_blocked_peer_does_not_supersede_viewer() {
    let mut h = Harness::new();
    let code = h.connect(Some("4321"), Some("4321"));
    let host_id = code.rendezvous_id("wordlink");

    // Getting blocked takes a channel, which displaces the viewer for a moment
    let mut raw = RawPeer::new(&h.network, "attacker");
    let first = raw.peer.connect(&host_id).unwrap();
    h.pump();
    for _ in 0..5 {
        raw.send(first, Message::AuthRequest { pin: Some("0000".into()) });
    }
    h.pump();
    assert!(RawPeer::was_closed(&raw.drain(), first));

    h.advance(Duration::from_secs(2));
    assert_eq!(h.viewer.manager.connection_status(), ConnectionStatus::Connected);
    assert!(h.host.manager.partner_present());

    let second = raw.peer.connect(&host_id).unwrap();
    h.pump();

    assert!(RawPeer::was_closed(&raw.drain(), second));
    assert_eq!(h.viewer.manager.connection_status(), ConnectionStatus::Connected);
    assert!(h.viewer.manager.partner_present());
    assert!(h.host.manager.partner_present());

    let before = h.state_count();
    let now = h.now;
    h.host
        .manager
        .send_game_state(GameState::new("SLATE"), now)
        .unwrap();
    h.pump();
    assert_eq!(h.state_count(), before + 1);
}

// ----------------------------------------------------------------------
// Suggestions
// ----------------------------------------------------------------------

/// Test: Accept a suggestion
/// Given a connected session
/// When the viewer suggests "crane" and the host accepts
/// Then the host gets CRANE back and the viewer is told it was accepted
#[test]
fn test_suggestion_accepted() {
    let mut h = Harness::new();
    h.connect(None, None);
    let now = h.now;

    h.viewer.manager.send_suggestion("crane", now).unwrap();
    h.pump();
    assert_eq!(h.host.manager.pending_suggestion(), Some("CRANE"));

    assert_eq!(h.host.manager.accept_suggestion(now), Some("CRANE".into()));
    assert_eq!(h.host.manager.pending_suggestion(), None);
    h.pump();

    assert_eq!(
        h.responses.lock().as_slice(),
        &[SuggestionResponse {
            word: "CRANE".into(),
            accepted: true,
        }]
    );
    assert_eq!(h.host.manager.accept_suggestion(now), None);
}

/// Test: Reject a suggestion
/// Given a pending suggestion
/// When the host rejects it
/// Then the viewer is told it was rejected
#[test]
fn test_suggestion_rejected() {
    let mut h = Harness::new();
    h.connect(None, None);
    let now = h.now;

    h.viewer.manager.send_suggestion("SLATE", now).unwrap();
    h.pump();
    h.host.manager.reject_suggestion(now);
    h.pump();

    assert_eq!(h.host.manager.pending_suggestion(), None);
    assert_eq!(
        h.responses.lock().as_slice(),
        &[SuggestionResponse {
            word: "SLATE".into(),
            accepted: false,
        }]
    );
}

/// Test: Clear and replace suggestions
/// Given a pending suggestion
/// When the viewer clears it, then suggests another word twice
/// Then the host's slot follows the last write
#[test]
fn test_clear_and_replace_suggestion() {
    let mut h = Harness::new();
    h.connect(None, None);
    let now = h.now;

    h.viewer.manager.send_suggestion("CRANE", now).unwrap();
    h.pump();
    h.viewer.manager.clear_suggestion(now).unwrap();
    h.pump();
    assert_eq!(h.host.manager.pending_suggestion(), None);

    h.viewer.manager.send_suggestion("SLATE", now).unwrap();
    h.viewer.manager.send_suggestion("PLANT", now).unwrap();
    h.pump();
    assert_eq!(h.host.manager.pending_suggestion(), Some("PLANT"));
}

/// Test: Local suggestion validation
/// Given a viewer
/// When it suggests a malformed word or is not connected
/// Then the call fails without sending anything
#[test]
fn test_invalid_suggestion_rejected_locally() {
    let mut h = Harness::new();
    let now = h.now;
    assert_eq!(
        h.viewer.manager.send_suggestion("CRANE", now),
        Err(SessionError::WrongRole)
    );

    h.connect(None, None);
    let delivered = h.network.frames_delivered();
    assert_eq!(
        h.viewer.manager.send_suggestion("CRAN", now),
        Err(SessionError::InvalidWord)
    );
    assert_eq!(
        h.viewer.manager.send_suggestion("CR4NE", now),
        Err(SessionError::InvalidWord)
    );
    assert_eq!(h.network.frames_delivered(), delivered);
}

// ----------------------------------------------------------------------
// Reliability
// ----------------------------------------------------------------------

/// Test: Lost critical message is resent
/// Given a connected session
/// When a game-state frame is lost
/// Then it is resent after the ack timeout and delivered
#[test]
fn test_lost_state_is_retried() {
    let mut h = Harness::new();
    h.connect(None, None);
    let before = h.state_count();

    h.network.drop_next(1);
    let now = h.now;
    h.host
        .manager
        .send_game_state(GameState::new("SLATE"), now)
        .unwrap();
    h.pump();
    assert_eq!(h.state_count(), before);
    assert_eq!(h.host.manager.pending_acks(), 1);

    h.advance(Duration::from_secs(3));
    assert_eq!(h.state_count(), before + 1);
    assert_eq!(h.host.manager.pending_acks(), 0);
}

/// Test: Duplicate delivery
/// Given a game-state that was delivered but whose ack was lost
/// When the host resends it
/// Then the viewer applies it once and acks again
#[test]
fn test_duplicate_delivery_applied_once() {
    let mut h = Harness::new();
    h.connect(None, None);
    let before = h.state_count();

    let now = h.now;
    h.host
        .manager
        .send_game_state(GameState::new("SLATE"), now)
        .unwrap();
    // The viewer's ack is the next frame on the wire
    h.network.drop_next(1);
    h.pump();
    assert_eq!(h.state_count(), before + 1);
    assert_eq!(h.host.manager.pending_acks(), 1);

    h.advance(Duration::from_secs(3));
    assert_eq!(h.state_count(), before + 1);
    assert_eq!(h.host.manager.pending_acks(), 0);
}

/// Test: Unacknowledged message
/// Given a connected session whose link silently stops carrying data
/// When a critical message exhausts its retries
/// Then the host drops the channel and the viewer starts reconnecting
#[test]
fn test_unacknowledged_message_drops_channel() {
    let mut h = Harness::new();
    h.connect(None, None);

    h.network.set_link_down(true);
    let now = h.now;
    h.host
        .manager
        .send_game_state(GameState::new("SLATE"), now)
        .unwrap();

    // Three resends at 3s intervals, then exhaustion
    h.advance(Duration::from_secs(12));

    assert!(!h.host.manager.partner_present());
    assert_eq!(h.host.manager.connection_status(), ConnectionStatus::Connected);
    assert_eq!(h.host.manager.pending_acks(), 0);
    assert_eq!(
        h.viewer.manager.connection_status(),
        ConnectionStatus::Connecting
    );
}

// ----------------------------------------------------------------------
// Liveness and reconnection
// ----------------------------------------------------------------------

/// Test: Heartbeat measures round trip
/// Given a connected session
/// When a heartbeat interval passes
/// Then both sides have a round-trip measurement
#[test]
fn test_heartbeat_measures_rtt() {
    let mut h = Harness::new();
    h.connect(None, None);
    assert_eq!(h.host.manager.rtt(), None);

    h.advance(Duration::from_secs(5));
    assert!(h.host.manager.rtt().is_some());
    assert!(h.viewer.manager.snapshot().rtt_ms.is_some());
}

/// Test: Silent connection loss and recovery
/// Given a connected session
/// When the link goes silent past the heartbeat timeout and then recovers
/// Then the viewer reconnects and the backoff counter resets
#[test]
fn test_heartbeat_timeout_reconnects() {
    let mut h = Harness::new();
    h.connect(None, None);
    let before = h.state_count();

    h.network.set_link_down(true);
    h.advance(Duration::from_secs(15));

    assert_eq!(
        h.viewer.manager.connection_status(),
        ConnectionStatus::Connecting
    );
    assert!(h
        .viewer
        .manager
        .status_message()
        .is_some_and(|s| s.starts_with("Reconnecting")));
    assert!(!h.host.manager.partner_present());

    h.network.set_link_down(false);
    h.advance(Duration::from_secs(2));

    assert_eq!(h.viewer.manager.connection_status(), ConnectionStatus::Connected);
    assert!(h.host.manager.partner_present());
    assert_eq!(h.viewer.manager.snapshot().reconnect_attempt, 0);
    assert_eq!(h.viewer.manager.status_message(), None);
    // The state is requested again after reconnecting
    assert_eq!(h.state_count(), before + 1);
}

/// Test: Reconnection budget
/// Given a connected session
/// When the host disappears for good
/// Then the viewer retries five times with backoff, then gives up
#[test]
fn test_reconnect_gives_up_after_budget() {
    let mut h = Harness::new();
    h.connect(None, None);
    let created = h.network.peers_created();

    h.host.manager.leave_session();
    h.pump();
    assert_eq!(
        h.viewer.manager.connection_status(),
        ConnectionStatus::Connecting
    );

    // 1 + 2 + 4 + 8 + 16 seconds of backoff
    h.advance(Duration::from_secs(30));
    assert_eq!(
        h.viewer.manager.connection_status(),
        ConnectionStatus::Connecting
    );

    h.advance(Duration::from_secs(2));
    assert_eq!(h.viewer.manager.connection_status(), ConnectionStatus::Error);
    assert_eq!(
        h.viewer.manager.error_message(),
        Some("Connection lost. Please rejoin the session.")
    );
    assert_eq!(h.network.peers_created(), created + 5);
    assert_eq!(h.viewer.manager.next_deadline(), None);
}

/// Test: Authentication never completes
/// Given a viewer whose channel opens but whose data frames are lost
/// When the connect timeout passes without auth-success
/// Then a reconnect is scheduled, and it succeeds once frames flow again
#[test]
fn test_connect_timeout_schedules_reconnect() {
    let mut h = Harness::new();
    let now = h.now;
    let code = h.host.manager.host_game(None, now).unwrap();
    h.host
        .manager
        .send_game_state(GameState::new("CRANE"), now)
        .unwrap();
    h.network.set_link_down(true);
    h.viewer
        .manager
        .join_game(&code.to_string(), None, now)
        .unwrap();
    h.pump();

    assert_eq!(
        h.viewer.manager.connection_status(),
        ConnectionStatus::Connecting
    );
    assert!(!h.host.manager.partner_present());

    h.advance(Duration::from_secs(14));
    assert_eq!(h.viewer.manager.snapshot().reconnect_attempt, 0);
    assert_eq!(h.viewer.manager.status_message(), None);

    h.advance(Duration::from_secs(1));
    assert_eq!(
        h.viewer.manager.connection_status(),
        ConnectionStatus::Connecting
    );
    assert!(h
        .viewer
        .manager
        .status_message()
        .is_some_and(|s| s.starts_with("Reconnecting")));
    assert_eq!(h.viewer.manager.snapshot().reconnect_attempt, 1);

    h.network.set_link_down(false);
    h.advance(Duration::from_secs(2));
    assert_eq!(h.viewer.manager.connection_status(), ConnectionStatus::Connected);
    assert_eq!(h.viewer.manager.snapshot().reconnect_attempt, 0);
    assert_eq!(h.state_count(), 1);
}

// ----------------------------------------------------------------------
// Hosting and teardown
// ----------------------------------------------------------------------

/// Test: Rendezvous id collision
/// Given a host whose id turns out to be taken
/// When the collision is reported
/// Then a new code is generated and registered without surfacing an error
#[test]
fn test_host_collision_regenerates_code() {
    let mut h = Harness::new();
    let now = h.now;
    let first = h.host.manager.host_game(None, now).unwrap();
    let first_id = first.rendezvous_id("wordlink");

    h.host.manager.handle_transport_event(
        TransportEvent::PeerError {
            peer: first_id.clone(),
            error: wordlink::network::TransportError::IdTaken(first_id.to_string()),
        },
        now,
    );
    let second = h.host.manager.session_code().cloned().unwrap();
    assert_ne!(second, first);
    assert_eq!(h.host.manager.error_message(), None);
    assert!(!h.network.is_registered(&first_id));

    h.advance(Duration::from_millis(500));
    assert!(h.network.is_registered(&second.rendezvous_id("wordlink")));
    assert_eq!(h.host.manager.connection_status(), ConnectionStatus::Connected);
}

/// Test: Join rate limit
/// Given a viewer
/// When it calls join six times in quick succession
/// Then the sixth is refused before any transport object is created
#[test]
fn test_sixth_rapid_join_is_refused() {
    let mut h = Harness::new();
    let now = h.now;

    for i in 0..5 {
        h.viewer
            .manager
            .join_game("ABCDEF-abcdef", None, now + Duration::from_millis(i))
            .unwrap();
    }
    let created = h.network.peers_created();

    let err = h
        .viewer
        .manager
        .join_game("ABCDEF-abcdef", None, now + Duration::from_millis(5))
        .unwrap_err();
    assert!(matches!(err, SessionError::RateLimited { .. }));
    assert_eq!(err.to_string(), "Too many join attempts. Please wait 30s.");
    assert_eq!(h.network.peers_created(), created);
    assert_eq!(h.viewer.manager.connection_status(), ConnectionStatus::Error);
}

/// Test: Leaving clears everything
/// Given a connected session
/// When both sides leave
/// Then no timers remain and all observable fields are reset
#[test]
fn test_leave_session_resets_state() {
    let mut h = Harness::new();
    let code = h.connect(Some("1234"), Some("1234"));
    h.advance(Duration::from_secs(5));

    h.viewer.manager.leave_session();
    h.host.manager.leave_session();
    h.pump();

    for manager in [&h.host.manager, &h.viewer.manager] {
        assert_eq!(manager.snapshot(), SessionSnapshot::default());
        assert_eq!(manager.next_deadline(), None);
        assert_eq!(manager.role(), Role::None);
    }
    assert!(!h.network.is_registered(&code.rendezvous_id("wordlink")));
    assert_eq!(h.network.channel_count(), 0);
}
