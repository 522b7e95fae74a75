//! Network error types

use std::time::Duration;

use thiserror::Error;

/// Errors reported by a transport call or transport event
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Rendezvous id already taken: {0}")]
    IdTaken(String),

    #[error("Peer unavailable: {0}")]
    PeerUnavailable(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Peer destroyed")]
    Destroyed,
}

/// Classification used to decide how a failure is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Self-healing; never shown to the user
    Transient,
    /// Retried automatically with backoff
    Recoverable,
    /// Ends the session with a fixed message
    Terminal,
    /// Local input or inbound payload rejected
    Validation,
}

/// Errors returned by session operations
///
/// The `Display` text is the fixed message shown to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid session code.")]
    InvalidCode,

    #[error("PIN must be 4-8 digits.")]
    InvalidPin,

    #[error("Not a valid word.")]
    InvalidWord,

    #[error("Session not found. Check the code and try again.")]
    SessionNotFound,

    #[error("Incorrect PIN.")]
    AuthFailed,

    #[error("Too many failed attempts. Try again later.")]
    AuthBlocked,

    #[error("Connection lost. Please rejoin the session.")]
    ReconnectExhausted,

    #[error("Too many join attempts. Please wait {}s.", .retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    #[error("Could not start session: {0}")]
    Transport(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Operation not available for this role")]
    WrongRole,
}

impl SessionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SessionError::InvalidCode
            | SessionError::InvalidPin
            | SessionError::InvalidWord
            | SessionError::NotConnected
            | SessionError::WrongRole => ErrorClass::Validation,
            SessionError::SessionNotFound
            | SessionError::AuthFailed
            | SessionError::AuthBlocked
            | SessionError::ReconnectExhausted
            | SessionError::RateLimited { .. }
            | SessionError::Transport(_) => ErrorClass::Terminal,
        }
    }
}

impl TransportError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TransportError::IdTaken(_) => ErrorClass::Transient,
            TransportError::PeerUnavailable(_) => ErrorClass::Terminal,
            TransportError::Network(_)
            | TransportError::ChannelClosed
            | TransportError::Destroyed => ErrorClass::Recoverable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_message_rounds_up() {
        let err = SessionError::RateLimited {
            retry_after: Duration::from_millis(400),
        };
        assert_eq!(err.to_string(), "Too many join attempts. Please wait 1s.");
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            TransportError::IdTaken("x".into()).class(),
            ErrorClass::Transient
        );
        assert_eq!(SessionError::AuthFailed.class(), ErrorClass::Terminal);
        assert_eq!(SessionError::InvalidWord.class(), ErrorClass::Validation);
    }
}
