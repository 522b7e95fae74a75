//! At-least-once delivery over the data channel
//!
//! Critical messages get a fresh correlation id and stay pending until the
//! partner acks them. A pending message whose deadline passes is resent with
//! the identical payload; after `max_retries` resends it is dropped and
//! reported back as exhausted so the session can treat the link as lost.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::protocol::{Envelope, Message, ProtocolError};

use super::transport::{ChannelId, Peer};

/// Remembered inbound correlation ids for duplicate suppression
const SEEN_ID_CAPACITY: usize = 64;

/// A sent message awaiting acknowledgment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub id: String,
    /// Encoded frame, resent verbatim
    pub payload: String,
    pub retry_count: u32,
    pub next_retry_at: Instant,
}

/// Tracks pending acknowledgments and drives retries
#[derive(Debug)]
pub struct AckTracker {
    pending: Vec<PendingMessage>,
    seen: VecDeque<String>,
    ack_timeout: Duration,
    max_retries: u32,
}

impl AckTracker {
    pub fn new(ack_timeout: Duration, max_retries: u32) -> Self {
        Self {
            pending: Vec::new(),
            seen: VecDeque::with_capacity(SEEN_ID_CAPACITY),
            ack_timeout,
            max_retries,
        }
    }

    /// Send a message, optionally requiring acknowledgment
    ///
    /// A transport failure is treated like a lost frame: an acked message
    /// stays pending and is retried, anything else is only logged.
    pub fn send<P: Peer + ?Sized>(
        &mut self,
        peer: &mut P,
        channel: ChannelId,
        message: Message,
        require_ack: bool,
        now: Instant,
    ) -> Result<(), ProtocolError> {
        let kind = message.kind();
        let envelope = if require_ack {
            Envelope::with_id(message, Uuid::new_v4().to_string())
        } else {
            Envelope::new(message)
        };
        let payload = envelope.encode()?;

        if let Some(id) = envelope.message_id {
            self.pending.push(PendingMessage {
                id,
                payload: payload.clone(),
                retry_count: 0,
                next_retry_at: now + self.ack_timeout,
            });
        }

        if let Err(e) = peer.send(channel, &payload) {
            warn!("Failed to send {}: {}", kind, e);
        } else {
            trace!("Sent {}", kind);
        }
        Ok(())
    }

    /// Clear the pending message acknowledged by `id`
    ///
    /// Returns false for unknown or already-cleared ids.
    pub fn on_ack(&mut self, id: &str) -> bool {
        match self.pending.iter().position(|p| p.id == id) {
            Some(index) => {
                self.pending.remove(index);
                trace!("Ack matched {}", id);
                true
            }
            None => {
                trace!("Ignoring ack for unknown id {}", id);
                false
            }
        }
    }

    /// Resend everything due and return messages that ran out of retries
    pub fn poll<P: Peer + ?Sized>(
        &mut self,
        peer: &mut P,
        channel: ChannelId,
        now: Instant,
    ) -> Vec<PendingMessage> {
        let mut exhausted = Vec::new();
        let max_retries = self.max_retries;
        let ack_timeout = self.ack_timeout;

        self.pending.retain_mut(|pending| {
            if pending.next_retry_at > now {
                return true;
            }
            if pending.retry_count >= max_retries {
                warn!(
                    "Message {} unacknowledged after {} retries",
                    pending.id, pending.retry_count
                );
                exhausted.push(pending.clone());
                return false;
            }

            pending.retry_count += 1;
            pending.next_retry_at = now + ack_timeout;
            debug!(
                "Resending {} (retry {}/{})",
                pending.id, pending.retry_count, max_retries
            );
            if let Err(e) = peer.send(channel, &pending.payload) {
                warn!("Failed to resend {}: {}", pending.id, e);
            }
            true
        });

        exhausted
    }

    /// Record an inbound correlation id; false if it was seen recently
    pub fn mark_received(&mut self, id: &str) -> bool {
        if self.seen.iter().any(|seen| seen == id) {
            return false;
        }
        if self.seen.len() >= SEEN_ID_CAPACITY {
            self.seen.pop_front();
        }
        self.seen.push_back(id.to_string());
        true
    }

    /// Earliest retry deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|p| p.next_retry_at).min()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.iter().any(|p| p.id == id)
    }

    /// Drop every pending message and forget seen ids
    pub fn clear(&mut self) {
        self.pending.clear();
        self.seen.clear();
    }
}

/// Ack owed for an inbound envelope, if any
pub fn ack_reply(envelope: &Envelope) -> Option<Message> {
    match (&envelope.message_id, envelope.message.is_critical()) {
        (Some(id), true) => Some(Message::Ack { id: id.clone() }),
        _ => None,
    }
}
