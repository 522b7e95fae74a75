//! Session protocol definitions
//!
//! Defines the tagged message set exchanged over the data channel and the
//! game state it carries.

mod message;
mod state;

pub use message::{
    AuthFailureReason, Envelope, Message, ProtocolError, MAX_MESSAGE_ID_LEN, MAX_MESSAGE_SIZE,
    MAX_PIN_LEN,
};
pub use state::{
    is_word_shape, GameState, GameStatus, LetterStatus, StandardRules, WordRules, MAX_GUESSES,
    WORD_LENGTH,
};
