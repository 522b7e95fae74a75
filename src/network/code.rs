//! Session codes and rendezvous identifiers
//!
//! A code looks like `K7WQ3M-a41f0c`: a short prefix a human can read aloud
//! and an unpredictable hex suffix. Both halves go into the rendezvous id, so
//! the prefix alone cannot be used to open a channel to a live session.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

use super::error::SessionError;
use super::transport::PeerId;

/// Prefix alphabet: no `I`, `O`, `0` or `1`
pub const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Characters in the human prefix
pub const PREFIX_LEN: usize = 6;

/// Hex characters in the suffix
pub const SUFFIX_LEN: usize = 6;

/// Length of the displayed code including the separator
pub const CODE_LEN: usize = PREFIX_LEN + 1 + SUFFIX_LEN;

/// Two-part session code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionCode {
    prefix: String,
    suffix: String,
}

impl SessionCode {
    /// Generate a fresh random code
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();

        let prefix = (0..PREFIX_LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        let suffix = format!("{:06x}", rng.gen_range(0..=0xFF_FFFFu32));

        Self { prefix, suffix }
    }

    /// Human-typable half
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Unpredictable half
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Transport address both sides use for this session
    pub fn rendezvous_id(&self, namespace: &str) -> PeerId {
        PeerId::new(format!("{}-{}{}", namespace, self.prefix, self.suffix))
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.prefix, self.suffix)
    }
}

impl FromStr for SessionCode {
    type Err = SessionError;

    /// Accepts surrounding whitespace and a lowercase prefix
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.len() != CODE_LEN {
            return Err(SessionError::InvalidCode);
        }

        let (prefix, suffix) = input.split_once('-').ok_or(SessionError::InvalidCode)?;
        let prefix = prefix.to_ascii_uppercase();
        let suffix = suffix.to_ascii_lowercase();

        if prefix.len() != PREFIX_LEN || !prefix.bytes().all(|b| CODE_ALPHABET.contains(&b)) {
            return Err(SessionError::InvalidCode);
        }
        if suffix.len() != SUFFIX_LEN || !suffix.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(SessionError::InvalidCode);
        }

        Ok(Self { prefix, suffix })
    }
}

/// Whether a string is a well-formed PIN (4-8 ASCII digits)
pub fn is_valid_pin(pin: &str) -> bool {
    (4..=8).contains(&pin.len()) && pin.chars().all(|c| c.is_ascii_digit())
}
