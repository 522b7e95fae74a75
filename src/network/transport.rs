//! Peer transport abstraction
//!
//! A transport registers a local peer under a rendezvous id, opens data
//! channels to other peers and carries text frames over them. Calls never
//! block; their outcomes arrive later as [`TransportEvent`]s, each tagged with
//! the local peer it belongs to so events from a destroyed peer can be
//! recognised and ignored.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::error::TransportError;

/// Transport-level address of a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random id in the given namespace
    pub fn random(namespace: &str) -> Self {
        Self(format!("{}-{}", namespace, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Asynchronous outcome reported by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The local peer is registered and reachable under its id
    PeerOpen { peer: PeerId },
    /// Peer-level failure (registration, lookup, network)
    PeerError { peer: PeerId, error: TransportError },
    /// A remote peer opened a channel to us
    ChannelIncoming {
        peer: PeerId,
        channel: ChannelId,
        remote: PeerId,
    },
    /// The channel is ready to carry data
    ChannelOpen { peer: PeerId, channel: ChannelId },
    /// A text frame arrived on a channel
    Data {
        peer: PeerId,
        channel: ChannelId,
        payload: String,
    },
    /// The channel was closed by either side or the network
    ChannelClosed { peer: PeerId, channel: ChannelId },
}

impl TransportEvent {
    /// Local peer the event belongs to
    pub fn peer(&self) -> &PeerId {
        match self {
            TransportEvent::PeerOpen { peer }
            | TransportEvent::PeerError { peer, .. }
            | TransportEvent::ChannelIncoming { peer, .. }
            | TransportEvent::ChannelOpen { peer, .. }
            | TransportEvent::Data { peer, .. }
            | TransportEvent::ChannelClosed { peer, .. } => peer,
        }
    }
}

/// Where a transport delivers its events
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// A registered local peer
pub trait Peer: Send {
    /// Local id this peer registered under
    fn id(&self) -> &PeerId;

    /// Open a channel to a remote peer; `ChannelOpen` or `PeerError` follows
    fn connect(&mut self, remote: &PeerId) -> Result<ChannelId, TransportError>;

    /// Send one text frame
    fn send(&mut self, channel: ChannelId, payload: &str) -> Result<(), TransportError>;

    /// Close a channel; the remote side sees `ChannelClosed`
    fn close_channel(&mut self, channel: ChannelId);

    /// Unregister and close every channel
    fn destroy(&mut self);
}

/// Constructs peers; `PeerOpen` or `PeerError` follows each `create`
pub trait PeerFactory: Send {
    type Peer: Peer;

    fn create(&mut self, id: &PeerId) -> Result<Self::Peer, TransportError>;
}
