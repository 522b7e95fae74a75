//! Rendezvous relay server
//!
//! Peers register an id over a WebSocket, open channels to other registered
//! ids and exchange text frames through the relay. The relay never looks
//! inside a frame.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::transport::{ChannelId, PeerId};

/// Relay wire messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RelayMessage {
    // Client -> Server
    Register { peer_id: PeerId },
    Connect { channel: ChannelId, target: PeerId },
    Close { channel: ChannelId },

    // Both directions
    Data { channel: ChannelId, payload: String },

    // Server -> Client
    Registered,
    RegisterFailed { reason: String },
    Incoming { channel: ChannelId, from: PeerId },
    ChannelOpen { channel: ChannelId },
    ChannelClosed { channel: ChannelId },
    Unavailable { channel: ChannelId, target: PeerId },
}

/// Relay server errors
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Bind failed: {0}")]
    Bind(#[source] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialize failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

type Outbox = mpsc::UnboundedSender<RelayMessage>;

#[derive(Default)]
struct RelayState {
    peers: HashMap<PeerId, Outbox>,
    /// channel -> (initiator, acceptor)
    channels: HashMap<ChannelId, (PeerId, PeerId)>,
}

impl RelayState {
    fn deliver(&self, to: &PeerId, msg: RelayMessage) {
        if let Some(outbox) = self.peers.get(to) {
            let _ = outbox.send(msg);
        }
    }

    /// The other end of `channel`, if `me` is one of its ends
    fn other_end(&self, channel: ChannelId, me: &PeerId) -> Option<PeerId> {
        match self.channels.get(&channel) {
            Some((a, b)) if a == me => Some(b.clone()),
            Some((a, b)) if b == me => Some(a.clone()),
            _ => None,
        }
    }

    /// Drop a registration and close every channel it was part of
    fn unregister(&mut self, id: &PeerId) {
        self.peers.remove(id);

        let owned: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|(_, (a, b))| a == id || b == id)
            .map(|(c, _)| *c)
            .collect();
        for channel in owned {
            if let Some(to) = self.other_end(channel, id) {
                self.channels.remove(&channel);
                self.deliver(&to, RelayMessage::ChannelClosed { channel });
            }
        }
    }
}

/// WebSocket rendezvous relay
#[derive(Clone, Default)]
pub struct RendezvousServer {
    state: Arc<RwLock<RelayState>>,
}

impl RendezvousServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `addr` and serve plain WebSocket connections
    pub async fn run(&self, addr: &str) -> Result<(), RelayError> {
        let listener = TcpListener::bind(addr).await.map_err(RelayError::Bind)?;
        info!("Rendezvous server listening on {}", addr);
        self.serve(listener, None).await;
        Ok(())
    }

    /// Accept connections forever, optionally wrapping each in TLS
    pub async fn serve(&self, listener: TcpListener, tls: Option<TlsAcceptor>) {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    debug!("New connection from {}", peer_addr);
                    let server = self.clone();
                    let tls = tls.clone();

                    tokio::spawn(async move {
                        match tls {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(tls_stream) => server.accept(tls_stream, peer_addr).await,
                                Err(e) => warn!("TLS handshake failed for {}: {}", peer_addr, e),
                            },
                            None => server.accept(stream, peer_addr).await,
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }

    async fn accept<S>(&self, stream: S, peer_addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("WebSocket upgrade failed for {}: {}", peer_addr, e);
                return;
            }
        };
        if let Err(e) = self.handle_connection(ws_stream).await {
            warn!("Connection error for {}: {}", peer_addr, e);
        }
    }

    /// Number of registered peer ids
    pub async fn peer_count(&self) -> usize {
        self.state.read().await.peers.len()
    }

    /// Number of open channels
    pub async fn channel_count(&self) -> usize {
        self.state.read().await.channels.len()
    }

    /// Serve one upgraded WebSocket until it closes
    pub async fn handle_connection<S>(&self, ws_stream: WebSocketStream<S>) -> Result<(), RelayError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut write, mut read) = ws_stream.split();
        let (outbox, mut inbox) = mpsc::unbounded_channel::<RelayMessage>();
        let mut current_id: Option<PeerId> = None;

        let result = loop {
            let outgoing = tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<RelayMessage>(&text) {
                                Ok(msg) => self.process_message(msg, &outbox, &mut current_id).await,
                                Err(e) => {
                                    warn!("Invalid message: {}", e);
                                    None
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break Ok(()),
                        Some(Err(e)) => break Err(RelayError::from(e)),
                        _ => None,
                    }
                }

                // Traffic forwarded from other connections
                Some(msg) = inbox.recv() => Some(msg),
            };

            if let Some(msg) = outgoing {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => break Err(e.into()),
                };
                if write.send(Message::Text(json)).await.is_err() {
                    break Ok(());
                }
            }
        };

        if let Some(id) = current_id {
            self.state.write().await.unregister(&id);
            info!("Peer {} disconnected", id);
        }

        result
    }

    async fn process_message(
        &self,
        msg: RelayMessage,
        outbox: &Outbox,
        current_id: &mut Option<PeerId>,
    ) -> Option<RelayMessage> {
        if let RelayMessage::Register { peer_id } = msg {
            if current_id.is_some() {
                return Some(RelayMessage::RegisterFailed {
                    reason: "connection already registered".to_string(),
                });
            }

            let mut state = self.state.write().await;
            if state.peers.contains_key(&peer_id) {
                debug!("Id {} already registered", peer_id);
                return Some(RelayMessage::RegisterFailed {
                    reason: format!("{} is taken", peer_id),
                });
            }
            state.peers.insert(peer_id.clone(), outbox.clone());
            info!("Peer {} registered", peer_id);
            *current_id = Some(peer_id);
            return Some(RelayMessage::Registered);
        }

        let Some(me) = current_id.as_ref() else {
            warn!("Ignoring message from unregistered connection");
            return None;
        };

        match msg {
            RelayMessage::Connect { channel, target } => {
                let mut state = self.state.write().await;
                if target == *me || !state.peers.contains_key(&target) {
                    debug!("{} asked for unknown peer {}", me, target);
                    return Some(RelayMessage::Unavailable { channel, target });
                }
                if state.channels.contains_key(&channel) {
                    warn!("Channel {} already exists", channel);
                    return None;
                }

                state.channels.insert(channel, (me.clone(), target.clone()));
                state.deliver(
                    &target,
                    RelayMessage::Incoming {
                        channel,
                        from: me.clone(),
                    },
                );
                state.deliver(&target, RelayMessage::ChannelOpen { channel });
                debug!("Channel {} opened: {} -> {}", channel, me, target);

                Some(RelayMessage::ChannelOpen { channel })
            }

            RelayMessage::Data { channel, payload } => {
                let state = self.state.read().await;
                match state.other_end(channel, me) {
                    Some(to) => {
                        state.deliver(&to, RelayMessage::Data { channel, payload });
                        None
                    }
                    None => Some(RelayMessage::ChannelClosed { channel }),
                }
            }

            RelayMessage::Close { channel } => {
                let mut state = self.state.write().await;
                if let Some(to) = state.other_end(channel, me) {
                    state.channels.remove(&channel);
                    state.deliver(&to, RelayMessage::ChannelClosed { channel });
                    debug!("Channel {} closed by {}", channel, me);
                }
                None
            }

            // Server->Client messages are ignored if received
            _ => None,
        }
    }
}
