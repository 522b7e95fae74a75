//! Network module for the P2P session layer
//!
//! Handles session setup, authentication, reliable delivery, liveness,
//! reconnection, and the transports that carry it all.

mod access;
mod code;
mod config;
mod context;
mod driver;
mod error;
mod liveness;
mod memory;
mod reconnect;
mod reliability;
mod rendezvous;
mod session;
mod transport;
mod websocket;

pub use access::{AuthDecision, JoinRateLimiter, PinGuard};
pub use code::{is_valid_pin, SessionCode, CODE_ALPHABET, CODE_LEN, PREFIX_LEN, SUFFIX_LEN};
pub use config::{ConfigError, SessionConfig};
pub use context::{ConnectionStatus, PendingSuggestion, Role, SessionSnapshot};
pub use driver::{SessionCommand, SessionDriver, SessionHandle, SessionNotification};
pub use error::{ErrorClass, SessionError, TransportError};
pub use liveness::{Heartbeat, HeartbeatAction};
pub use memory::{MemoryNetwork, MemoryPeer, MemoryPeerFactory};
pub use reconnect::ReconnectController;
pub use reliability::{ack_reply, AckTracker, PendingMessage};
pub use rendezvous::{RelayError, RelayMessage, RendezvousServer};
pub use session::{GameStateCallback, SessionManager, SuggestionCallback, SuggestionResponse};
pub use transport::{ChannelId, EventSink, Peer, PeerFactory, PeerId, TransportEvent};
pub use websocket::{WsPeer, WsPeerFactory};
