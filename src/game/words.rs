//! Dictionary and Combo Validation
//!
//! The validator is built once at boot from two flat word lists and never
//! mutated afterwards; every session holds it behind an `Arc`. Loading
//! failures are fatal to the process - there is no game without a
//! dictionary.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use rand::seq::{IteratorRandom, SliceRandom};

/// Token handed out when the combo list is empty.
///
/// Boot rejects empty lists, so this only surfaces if a validator is built
/// through a path that skips that check. No dictionary word contains it,
/// which turns every submit into a plain WRONG instead of a panic.
pub const EMPTY_COMBO: &str = "-";

/// Errors while loading the word lists at boot.
#[derive(Debug, thiserror::Error)]
pub enum WordListError {
    /// A list file could not be read.
    #[error("failed to read word list {path}: {source}")]
    Unreadable {
        /// Path that was attempted.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The dictionary contained no usable words.
    #[error("dictionary {path} contains no words")]
    EmptyDictionary {
        /// Path that was loaded.
        path: String,
    },

    /// The combo list contained no usable tokens.
    #[error("combo list {path} contains no combos")]
    EmptyCombos {
        /// Path that was loaded.
        path: String,
    },
}

/// Outcome of validating one submitted word against the current combo.
///
/// TIMEOUT is deliberately absent: it is detected by the session engine,
/// never produced by validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordCheck {
    /// Word is in the dictionary, contains the combo, and is unused.
    Correct,
    /// Word is empty, misses the combo, or is not in the dictionary.
    Wrong,
    /// Word was already played earlier in this match.
    AlreadyUsed,
}

/// Immutable dictionary plus combo list.
#[derive(Debug)]
pub struct WordValidator {
    /// Normalized (trimmed, lowercased) dictionary words.
    words: HashSet<String>,
    /// Normalized combo tokens, kept in a `Vec` for uniform sampling.
    combos: Vec<String>,
}

impl WordValidator {
    /// Load both lists from flat files, one entry per line.
    ///
    /// Blank lines are skipped and entries are normalized to lowercase. An
    /// unreadable or empty list is an error - callers are expected to treat
    /// it as fatal before the server starts accepting connections.
    pub fn from_files(
        words_path: impl AsRef<Path>,
        combos_path: impl AsRef<Path>,
    ) -> Result<Self, WordListError> {
        let words_path = words_path.as_ref();
        let combos_path = combos_path.as_ref();

        let words = read_lines(words_path)?;
        if words.is_empty() {
            return Err(WordListError::EmptyDictionary {
                path: words_path.display().to_string(),
            });
        }

        let combos = read_lines(combos_path)?;
        if combos.is_empty() {
            return Err(WordListError::EmptyCombos {
                path: combos_path.display().to_string(),
            });
        }

        Ok(Self::from_lists(words, combos))
    }

    /// Build a validator from in-memory lists. Used by tests and tooling.
    pub fn from_lists(
        words: impl IntoIterator<Item = String>,
        combos: impl IntoIterator<Item = String>,
    ) -> Self {
        let words: HashSet<String> = words
            .into_iter()
            .map(|w| normalize(&w))
            .filter(|w| !w.is_empty())
            .collect();
        let combos: Vec<String> = combos
            .into_iter()
            .map(|c| normalize(&c))
            .filter(|c| !c.is_empty())
            .collect();

        Self { words, combos }
    }

    /// Number of dictionary words.
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Number of combo tokens.
    pub fn combo_count(&self) -> usize {
        self.combos.len()
    }

    /// Pick a combo uniformly at random.
    pub fn generate_combo(&self) -> String {
        self.combos
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| EMPTY_COMBO.to_string())
    }

    /// Validate a submitted word against the current combo and the words
    /// already played this match.
    ///
    /// The rule chain is ordered: emptiness, reuse, combo containment,
    /// dictionary membership. `used_words` must hold normalized entries.
    pub fn validate(&self, word: &str, combo: &str, used_words: &HashSet<String>) -> WordCheck {
        let word = normalize(word);
        if word.is_empty() {
            return WordCheck::Wrong;
        }
        if used_words.contains(&word) {
            return WordCheck::AlreadyUsed;
        }
        if !word.contains(&normalize(combo)) {
            return WordCheck::Wrong;
        }
        if !self.words.contains(&word) {
            return WordCheck::Wrong;
        }
        WordCheck::Correct
    }

    /// Normalized form of a word, as stored in `used_words`.
    pub fn normalize_word(&self, word: &str) -> String {
        normalize(word)
    }

    /// Sample up to `n` dictionary words containing `combo`, without
    /// replacement. Shown to players next to the combos they timed out on.
    pub fn sample_examples(&self, combo: &str, n: usize) -> Vec<String> {
        let combo = normalize(combo);
        self.words
            .iter()
            .filter(|w| w.contains(&combo))
            .cloned()
            .choose_multiple(&mut rand::thread_rng(), n)
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn read_lines(path: &Path) -> Result<Vec<String>, WordListError> {
    let content = fs::read_to_string(path).map_err(|source| WordListError::Unreadable {
        path: path.display().to_string(),
        source,
    })?;
    Ok(content.lines().map(str::to_string).collect())
}
