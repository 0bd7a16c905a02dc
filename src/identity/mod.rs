//! Identity - recovery phrase generation and the backup confirmation quiz.
//!
//! The phrase is the secret handed to the engine on `connect`. Storing it is
//! the caller's business.

use bip39::{Language, Mnemonic};
use rand::seq::index;
use rand::{Rng, RngCore};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("word count must be 12 or 24, got {0}")]
    WordCount(usize),
    #[error("invalid recovery phrase: {0}")]
    Invalid(String),
    #[error("phrase too short for a quiz")]
    TooShort,
}

/// BIP39 English phrase.
#[derive(Clone, PartialEq, Eq)]
pub struct RecoveryPhrase(Mnemonic);

impl RecoveryPhrase {
    /// Fresh phrase from the thread RNG. 12 or 24 words.
    pub fn generate(word_count: usize) -> Result<Self, IdentityError> {
        let entropy_len = match word_count {
            12 => 16,
            24 => 32,
            n => return Err(IdentityError::WordCount(n)),
        };
        let mut entropy = vec![0u8; entropy_len];
        rand::thread_rng().fill_bytes(&mut entropy);
        Mnemonic::from_entropy_in(Language::English, &entropy)
            .map(Self)
            .map_err(|e| IdentityError::Invalid(e.to_string()))
    }

    /// Accepts any whitespace and letter case.
    pub fn parse(phrase: &str) -> Result<Self, IdentityError> {
        let normalized = phrase.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ");
        Mnemonic::parse_in(Language::English, &normalized)
            .map(Self)
            .map_err(|e| IdentityError::Invalid(e.to_string()))
    }

    pub fn words(&self) -> Vec<&'static str> {
        self.0.word_iter().collect()
    }

    pub fn word_count(&self) -> usize {
        self.0.word_count()
    }

    /// Space-separated words, as handed to the engine.
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Debug for RecoveryPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecoveryPhrase({} words)", self.word_count())
    }
}

/// Asks for two words of the phrase back before the backup counts as done.
#[derive(Debug, Clone)]
pub struct QuizChallenge {
    indices: [usize; 2],
    expected: [&'static str; 2],
}

impl QuizChallenge {
    pub fn new<R: Rng + ?Sized>(phrase: &RecoveryPhrase, rng: &mut R) -> Result<Self, IdentityError> {
        let words = phrase.words();
        if words.len() < 2 {
            return Err(IdentityError::TooShort);
        }
        let mut picked = index::sample(rng, words.len(), 2).into_vec();
        picked.sort_unstable();
        let indices = [picked[0], picked[1]];
        Ok(Self { indices, expected: [words[indices[0]], words[indices[1]]] })
    }

    /// Zero-based positions being asked for, ascending.
    pub fn indices(&self) -> [usize; 2] {
        self.indices
    }

    /// One-based positions, for prompts like "word #3".
    pub fn positions(&self) -> [usize; 2] {
        [self.indices[0] + 1, self.indices[1] + 1]
    }

    pub fn verify(&self, answers: [&str; 2]) -> bool {
        answers.iter().zip(self.expected.iter()).all(|(given, want)| given.trim().eq_ignore_ascii_case(want))
    }
}
