//! Game state carried over the wire and the word-rules collaborator
//!
//! The session layer never interprets game rules itself. The host hands it a
//! full [`GameState`]; the layer strips the solution before anything is
//! addressed to a viewer.

use serde::{Deserialize, Serialize};

/// Length of every guess and answer
pub const WORD_LENGTH: usize = 5;

/// Maximum number of guesses in one game
pub const MAX_GUESSES: usize = 6;

/// Coloring of a single letter in a submitted guess
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LetterStatus {
    /// Right letter, right position
    Correct,
    /// Letter occurs elsewhere in the answer
    Present,
    /// Letter not in the answer (or all occurrences already used)
    Absent,
}

/// Game progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    #[default]
    Playing,
    Won,
    Lost,
}

/// Authoritative game state as held by the host
///
/// `solution` is `None` in every copy that has passed through
/// [`GameState::redacted`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
    pub guesses: Vec<String>,
    pub evaluations: Vec<Vec<LetterStatus>>,
    pub current_guess: String,
    pub game_status: GameStatus,
}

impl GameState {
    /// Start a new game for the given answer
    pub fn new(solution: &str) -> Self {
        Self {
            solution: Some(solution.to_ascii_uppercase()),
            ..Self::default()
        }
    }

    /// Copy of this state safe to send to a viewer
    pub fn redacted(&self) -> Self {
        Self {
            solution: None,
            ..self.clone()
        }
    }

    /// Structural check applied to every inbound state
    pub fn validate(&self) -> Result<(), String> {
        if self.solution.is_some() {
            return Err("state addressed to a viewer must not carry a solution".into());
        }
        if self.guesses.len() > MAX_GUESSES {
            return Err(format!("too many guesses: {}", self.guesses.len()));
        }
        if self.evaluations.len() != self.guesses.len() {
            return Err(format!(
                "evaluation rows ({}) do not match guesses ({})",
                self.evaluations.len(),
                self.guesses.len()
            ));
        }
        for (guess, row) in self.guesses.iter().zip(&self.evaluations) {
            if !is_word_shape(guess) {
                return Err(format!("malformed guess: {:?}", guess));
            }
            if row.len() != WORD_LENGTH {
                return Err(format!("evaluation row has {} entries", row.len()));
            }
        }
        if self.current_guess.len() > WORD_LENGTH
            || !self.current_guess.chars().all(|c| c.is_ascii_alphabetic())
        {
            return Err(format!("malformed current guess: {:?}", self.current_guess));
        }
        Ok(())
    }
}

/// Exactly [`WORD_LENGTH`] ASCII letters
pub fn is_word_shape(word: &str) -> bool {
    word.len() == WORD_LENGTH && word.chars().all(|c| c.is_ascii_alphabetic())
}

/// Word-game rules consumed by the session layer
pub trait WordRules: Send + Sync {
    /// Color each letter of `guess` against `answer`
    fn letter_statuses(&self, guess: &str, answer: &str) -> Vec<LetterStatus>;

    /// Whether `word` is an acceptable guess
    fn is_valid_word(&self, word: &str) -> bool;
}

/// Standard two-pass coloring; any five-letter word is accepted
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRules;

impl WordRules for StandardRules {
    fn letter_statuses(&self, guess: &str, answer: &str) -> Vec<LetterStatus> {
        let guess: Vec<u8> = guess.to_ascii_uppercase().into_bytes();
        let answer: Vec<u8> = answer.to_ascii_uppercase().into_bytes();

        let mut statuses = vec![LetterStatus::Absent; guess.len()];
        let mut remaining = [0u8; 26];

        // Exact matches first, counting the unmatched answer letters
        for (i, &g) in guess.iter().enumerate() {
            match answer.get(i) {
                Some(&a) if a == g => statuses[i] = LetterStatus::Correct,
                Some(&a) if a.is_ascii_uppercase() => remaining[(a - b'A') as usize] += 1,
                _ => {}
            }
        }

        for (i, &g) in guess.iter().enumerate() {
            if statuses[i] == LetterStatus::Correct || !g.is_ascii_uppercase() {
                continue;
            }
            let slot = &mut remaining[(g - b'A') as usize];
            if *slot > 0 {
                *slot -= 1;
                statuses[i] = LetterStatus::Present;
            }
        }

        statuses
    }

    fn is_valid_word(&self, word: &str) -> bool {
        is_word_shape(word)
    }
}
