//! wordlink - P2P session layer for a two-player word game
//!
//! One client hosts the authoritative game, the other watches and proposes
//! guesses. This library provides the session, protocol, and transport
//! layers that connect them.

pub mod network;
pub mod protocol;

pub use network::{SessionConfig, SessionDriver, SessionHandle, SessionManager};
pub use protocol::{GameState, Message};
