//! Operator-input classification: the authorization phrase and the
//! conservative write-intent heuristic.

use once_cell::sync::Lazy;
use regex::Regex;

/// Default session authorization phrase.
pub const DEFAULT_AUTH_PHRASE: &str = "jfdi";

/// True when `input` is exactly the authorization phrase (after trimming,
/// case-insensitive). Anything longer is an ordinary instruction.
#[must_use]
pub fn is_auth_phrase(input: &str, phrase: &str) -> bool {
    let phrase = phrase.trim();
    !phrase.is_empty() && input.trim().eq_ignore_ascii_case(phrase)
}

static WRITE_INTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(write|create|add|generate|produce|save|append|commit|apply|patch|update|make|build|draft)\b",
    )
    .expect("write-intent pattern is a valid regex")
});

/// Conservative check for instructions that unambiguously ask for a write.
///
/// Only a clear imperative verb counts. A false negative merely triggers a
/// confirmation prompt; a false positive would skip one, so ambiguity must
/// resolve to `false`.
#[must_use]
pub fn instruction_implies_write(instruction: &str) -> bool {
    WRITE_INTENT.is_match(&instruction.to_lowercase())
}
