//! In-memory loopback transport
//!
//! Delivers events straight into each peer's sink, synchronously. Used for
//! tests and for local play without a rendezvous server. The network can be
//! told to lose frames so retry and liveness paths can be exercised.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::error::TransportError;
use super::transport::{ChannelId, EventSink, Peer, PeerFactory, PeerId, TransportEvent};

#[derive(Default)]
struct NetworkInner {
    peers: HashMap<PeerId, EventSink>,
    /// channel -> (initiator, acceptor)
    channels: HashMap<ChannelId, (PeerId, PeerId)>,
    link_down: bool,
    drop_next: usize,
    peers_created: usize,
    frames_delivered: usize,
}

impl NetworkInner {
    fn emit(&self, to: &PeerId, event: TransportEvent) {
        if let Some(sink) = self.peers.get(to) {
            // A dropped receiver means the owner is gone
            let _ = sink.send(event);
        }
    }

    fn other_end(&self, channel: ChannelId, me: &PeerId) -> Option<PeerId> {
        self.channels.get(&channel).map(|(a, b)| {
            if a == me {
                b.clone()
            } else {
                a.clone()
            }
        })
    }
}

/// Shared in-memory network
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose peers deliver events into `sink`
    pub fn factory(&self, sink: EventSink) -> MemoryPeerFactory {
        MemoryPeerFactory {
            network: self.clone(),
            sink,
        }
    }

    /// Silently lose every data frame while `down` is set
    pub fn set_link_down(&self, down: bool) {
        self.inner.lock().link_down = down;
    }

    /// Silently lose the next `count` data frames
    pub fn drop_next(&self, count: usize) {
        self.inner.lock().drop_next = count;
    }

    /// Number of peers ever created on this network
    pub fn peers_created(&self) -> usize {
        self.inner.lock().peers_created
    }

    /// Number of data frames delivered so far
    pub fn frames_delivered(&self) -> usize {
        self.inner.lock().frames_delivered
    }

    /// Whether `id` is currently registered
    pub fn is_registered(&self, id: &PeerId) -> bool {
        self.inner.lock().peers.contains_key(id)
    }

    /// Number of open channels
    pub fn channel_count(&self) -> usize {
        self.inner.lock().channels.len()
    }
}

/// Creates [`MemoryPeer`]s on a [`MemoryNetwork`]
pub struct MemoryPeerFactory {
    network: MemoryNetwork,
    sink: EventSink,
}

impl PeerFactory for MemoryPeerFactory {
    type Peer = MemoryPeer;

    fn create(&mut self, id: &PeerId) -> Result<MemoryPeer, TransportError> {
        let mut inner = self.network.inner.lock();
        inner.peers_created += 1;

        let registered = if inner.peers.contains_key(id) {
            debug!("Memory network: id {} already taken", id);
            let _ = self.sink.send(TransportEvent::PeerError {
                peer: id.clone(),
                error: TransportError::IdTaken(id.to_string()),
            });
            false
        } else {
            inner.peers.insert(id.clone(), self.sink.clone());
            inner.emit(id, TransportEvent::PeerOpen { peer: id.clone() });
            true
        };

        Ok(MemoryPeer {
            network: self.network.clone(),
            id: id.clone(),
            sink: self.sink.clone(),
            registered,
        })
    }
}

/// A peer on the in-memory network
pub struct MemoryPeer {
    network: MemoryNetwork,
    id: PeerId,
    sink: EventSink,
    registered: bool,
}

impl Peer for MemoryPeer {
    fn id(&self) -> &PeerId {
        &self.id
    }

    fn connect(&mut self, remote: &PeerId) -> Result<ChannelId, TransportError> {
        if !self.registered {
            return Err(TransportError::Destroyed);
        }

        let mut inner = self.network.inner.lock();
        let channel = ChannelId::new();

        if !inner.peers.contains_key(remote) {
            let _ = self.sink.send(TransportEvent::PeerError {
                peer: self.id.clone(),
                error: TransportError::PeerUnavailable(remote.to_string()),
            });
            return Ok(channel);
        }

        inner
            .channels
            .insert(channel, (self.id.clone(), remote.clone()));
        inner.emit(
            remote,
            TransportEvent::ChannelIncoming {
                peer: remote.clone(),
                channel,
                remote: self.id.clone(),
            },
        );
        inner.emit(
            remote,
            TransportEvent::ChannelOpen {
                peer: remote.clone(),
                channel,
            },
        );
        inner.emit(
            &self.id,
            TransportEvent::ChannelOpen {
                peer: self.id.clone(),
                channel,
            },
        );

        Ok(channel)
    }

    fn send(&mut self, channel: ChannelId, payload: &str) -> Result<(), TransportError> {
        let mut inner = self.network.inner.lock();
        let to = inner
            .other_end(channel, &self.id)
            .ok_or(TransportError::ChannelClosed)?;

        if inner.link_down {
            trace!("Memory network: link down, dropping frame");
            return Ok(());
        }
        if inner.drop_next > 0 {
            inner.drop_next -= 1;
            trace!("Memory network: dropping frame");
            return Ok(());
        }

        inner.frames_delivered += 1;
        inner.emit(
            &to,
            TransportEvent::Data {
                peer: to.clone(),
                channel,
                payload: payload.to_string(),
            },
        );
        Ok(())
    }

    fn close_channel(&mut self, channel: ChannelId) {
        let mut inner = self.network.inner.lock();
        if let Some(to) = inner.other_end(channel, &self.id) {
            inner.channels.remove(&channel);
            inner.emit(&to, TransportEvent::ChannelClosed { peer: to.clone(), channel });
        }
    }

    fn destroy(&mut self) {
        if !self.registered {
            return;
        }
        self.registered = false;

        let mut inner = self.network.inner.lock();
        let owned: Vec<ChannelId> = inner
            .channels
            .iter()
            .filter(|(_, (a, b))| *a == self.id || *b == self.id)
            .map(|(c, _)| *c)
            .collect();

        for channel in owned {
            if let Some(to) = inner.other_end(channel, &self.id) {
                inner.channels.remove(&channel);
                inner.emit(&to, TransportEvent::ChannelClosed { peer: to.clone(), channel });
            }
        }
        inner.peers.remove(&self.id);
        debug!("Memory network: peer {} destroyed", self.id);
    }
}

impl Drop for MemoryPeer {
    fn drop(&mut self) {
        self.destroy();
    }
}
