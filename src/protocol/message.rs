//! Session message definitions
//!
//! Every frame on the data channel is one JSON object:
//!
//! ```text
//! {"type": "<kind>", ...fields, "messageId": "<opaque>"}
//! ```
//!
//! `messageId` is present only on sends that require acknowledgment and is
//! never interpreted outside the reliability layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::{is_word_shape, GameState};

/// Upper bound on a single encoded frame
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Upper bound on a correlation identifier
pub const MAX_MESSAGE_ID_LEN: usize = 64;

/// Longest PIN accepted on the wire
pub const MAX_PIN_LEN: usize = 8;

/// Errors produced while decoding or validating an inbound frame
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Message too large: {0} bytes")]
    TooLarge(usize),

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid message: {0}")]
    Invalid(String),
}

/// Why the host refused an authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthFailureReason {
    /// The presented PIN did not match
    InvalidPin,
    /// Too many failures from this peer; cooling down
    Blocked,
}

/// Closed set of session messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    // Viewer -> Host
    RequestState,
    SuggestWord { word: String },
    ClearSuggestion,
    AuthRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pin: Option<String>,
    },

    // Host -> Viewer
    GameState { state: GameState },
    SuggestionAccepted { word: String },
    SuggestionRejected { word: String },
    AuthSuccess,
    AuthFailure { reason: AuthFailureReason },

    // Both directions
    Ack { id: String },
    Ping { timestamp: u64 },
    Pong { timestamp: u64 },
}

impl Message {
    /// Wire tag, used for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Message::RequestState => "request-state",
            Message::SuggestWord { .. } => "suggest-word",
            Message::ClearSuggestion => "clear-suggestion",
            Message::AuthRequest { .. } => "auth-request",
            Message::GameState { .. } => "game-state",
            Message::SuggestionAccepted { .. } => "suggestion-accepted",
            Message::SuggestionRejected { .. } => "suggestion-rejected",
            Message::AuthSuccess => "auth-success",
            Message::AuthFailure { .. } => "auth-failure",
            Message::Ack { .. } => "ack",
            Message::Ping { .. } => "ping",
            Message::Pong { .. } => "pong",
        }
    }

    /// Kinds delivered with acknowledgment and retry
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Message::RequestState
                | Message::GameState { .. }
                | Message::SuggestWord { .. }
                | Message::SuggestionAccepted { .. }
                | Message::SuggestionRejected { .. }
        )
    }

    /// Whether this kind may be processed before authentication completes
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Message::AuthRequest { .. } | Message::AuthSuccess | Message::AuthFailure { .. }
        )
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Message::SuggestWord { word }
            | Message::SuggestionAccepted { word }
            | Message::SuggestionRejected { word } => {
                if !is_word_shape(word) {
                    return Err(ProtocolError::Invalid(format!("bad word {:?}", word)));
                }
            }
            Message::AuthRequest { pin: Some(pin) } => {
                if pin.len() > MAX_PIN_LEN || !pin.chars().all(|c| c.is_ascii_digit()) {
                    return Err(ProtocolError::Invalid("bad pin field".into()));
                }
            }
            Message::GameState { state } => {
                state.validate().map_err(ProtocolError::Invalid)?;
            }
            Message::Ack { id } => validate_message_id(id)?,
            _ => {}
        }
        Ok(())
    }
}

fn validate_message_id(id: &str) -> Result<(), ProtocolError> {
    if id.is_empty() || id.len() > MAX_MESSAGE_ID_LEN {
        return Err(ProtocolError::Invalid(format!(
            "bad correlation id length {}",
            id.len()
        )));
    }
    Ok(())
}

/// A message plus its optional correlation identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: Message,

    #[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl Envelope {
    /// Wrap a message that does not need acknowledgment
    pub fn new(message: Message) -> Self {
        Self {
            message,
            message_id: None,
        }
    }

    /// Wrap a message tagged with a correlation identifier
    pub fn with_id(message: Message, id: String) -> Self {
        Self {
            message,
            message_id: Some(id),
        }
    }

    /// Serialize to the wire representation
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and structurally validate an inbound frame
    ///
    /// Never panics; anything that is not exactly one known message shape
    /// comes back as an error and must be dropped by the caller.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        if text.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(text.len()));
        }

        let envelope: Envelope = serde_json::from_str(text)?;
        if let Some(ref id) = envelope.message_id {
            validate_message_id(id)?;
        }
        envelope.message.validate()?;

        Ok(envelope)
    }
}
