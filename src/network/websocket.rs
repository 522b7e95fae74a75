//! WebSocket transport through a rendezvous relay
//!
//! Each [`WsPeer`] owns one relay connection, driven by a background task.
//! Outbound calls are queued to that task and never block; relay messages
//! come back as [`TransportEvent`]s on the factory's sink.

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};

use super::error::TransportError;
use super::rendezvous::RelayMessage;
use super::transport::{ChannelId, EventSink, Peer, PeerFactory, PeerId, TransportEvent};

/// Creates [`WsPeer`]s connected to one relay
pub struct WsPeerFactory {
    server_url: String,
    sink: EventSink,
    runtime: Handle,
}

impl WsPeerFactory {
    /// Must be called from within a tokio runtime
    pub fn new(server_url: &str, sink: EventSink) -> Result<Self, TransportError> {
        let runtime = Handle::try_current().map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self {
            server_url: server_url.to_string(),
            sink,
            runtime,
        })
    }
}

impl PeerFactory for WsPeerFactory {
    type Peer = WsPeer;

    fn create(&mut self, id: &PeerId) -> Result<WsPeer, TransportError> {
        let (outbox, inbox) = mpsc::unbounded_channel();
        self.runtime.spawn(run_peer(
            self.server_url.clone(),
            id.clone(),
            self.sink.clone(),
            inbox,
        ));

        Ok(WsPeer {
            id: id.clone(),
            outbox: Some(outbox),
        })
    }
}

/// A peer registered on a rendezvous relay
pub struct WsPeer {
    id: PeerId,
    /// Dropping the sender shuts the relay connection down
    outbox: Option<mpsc::UnboundedSender<RelayMessage>>,
}

impl WsPeer {
    fn queue(&self, msg: RelayMessage) -> Result<(), TransportError> {
        let outbox = self.outbox.as_ref().ok_or(TransportError::Destroyed)?;
        outbox
            .send(msg)
            .map_err(|_| TransportError::Network("relay connection closed".into()))
    }
}

impl Peer for WsPeer {
    fn id(&self) -> &PeerId {
        &self.id
    }

    fn connect(&mut self, remote: &PeerId) -> Result<ChannelId, TransportError> {
        let channel = ChannelId::new();
        self.queue(RelayMessage::Connect {
            channel,
            target: remote.clone(),
        })?;
        Ok(channel)
    }

    fn send(&mut self, channel: ChannelId, payload: &str) -> Result<(), TransportError> {
        self.queue(RelayMessage::Data {
            channel,
            payload: payload.to_string(),
        })
    }

    fn close_channel(&mut self, channel: ChannelId) {
        if let Err(e) = self.queue(RelayMessage::Close { channel }) {
            debug!("Close of {} not sent: {}", channel, e);
        }
    }

    fn destroy(&mut self) {
        if self.outbox.take().is_some() {
            debug!("Peer {} destroyed", self.id);
        }
    }
}

impl Drop for WsPeer {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Translate a relay message into a transport event for `peer`
fn to_event(peer: &PeerId, msg: RelayMessage) -> Option<TransportEvent> {
    let peer = peer.clone();
    let event = match msg {
        RelayMessage::Registered => TransportEvent::PeerOpen { peer },
        RelayMessage::RegisterFailed { reason } => TransportEvent::PeerError {
            peer,
            error: TransportError::IdTaken(reason),
        },
        RelayMessage::Incoming { channel, from } => TransportEvent::ChannelIncoming {
            peer,
            channel,
            remote: from,
        },
        RelayMessage::ChannelOpen { channel } => TransportEvent::ChannelOpen { peer, channel },
        RelayMessage::Data { channel, payload } => TransportEvent::Data {
            peer,
            channel,
            payload,
        },
        RelayMessage::ChannelClosed { channel } => TransportEvent::ChannelClosed { peer, channel },
        RelayMessage::Unavailable { target, .. } => TransportEvent::PeerError {
            peer,
            error: TransportError::PeerUnavailable(target.to_string()),
        },
        RelayMessage::Register { .. } | RelayMessage::Connect { .. } | RelayMessage::Close { .. } => {
            return None
        }
    };
    Some(event)
}

/// Relay connection task for one peer
async fn run_peer(
    server_url: String,
    id: PeerId,
    sink: EventSink,
    mut inbox: mpsc::UnboundedReceiver<RelayMessage>,
) {
    let fail = |reason: String| {
        let _ = sink.send(TransportEvent::PeerError {
            peer: id.clone(),
            error: TransportError::Network(reason),
        });
    };

    let ws_stream = match connect_async(&server_url).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!("Failed to reach relay {}: {}", server_url, e);
            fail(format!("Connect failed: {}", e));
            return;
        }
    };
    debug!("Connected to relay {} as {}", server_url, id);

    let (mut write, mut read) = ws_stream.split();

    let register = RelayMessage::Register {
        peer_id: id.clone(),
    };
    match serde_json::to_string(&register) {
        Ok(json) => {
            if let Err(e) = write.send(Message::Text(json)).await {
                fail(format!("Send failed: {}", e));
                return;
            }
        }
        Err(e) => {
            fail(format!("Serialize failed: {}", e));
            return;
        }
    }

    loop {
        tokio::select! {
            out = inbox.recv() => {
                let Some(msg) = out else {
                    // Peer destroyed
                    break;
                };
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize relay message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json)).await {
                    fail(format!("Send failed: {}", e));
                    return;
                }
            }

            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<RelayMessage>(&text) {
                            Ok(msg) => {
                                trace!("Relay -> {}: {:?}", id, msg);
                                if let Some(event) = to_event(&id, msg) {
                                    let _ = sink.send(event);
                                }
                            }
                            Err(e) => warn!("Invalid relay message: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        fail("Relay connection closed".into());
                        return;
                    }
                    Some(Err(e)) => {
                        fail(format!("Receive failed: {}", e));
                        return;
                    }
                    _ => {}
                }
            }
        }
    }

    let _ = write.close().await;
}
