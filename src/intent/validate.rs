//! Transcript screening before intent matching

use crate::{Error, Result};

/// Phrases that end a multi-turn session
const END_PHRASES: &[&str] = &[
    "stop",
    "cancel",
    "goodbye",
    "good bye",
    "bye",
    "that's all",
    "thats all",
    "that is all",
    "never mind",
    "nevermind",
];

/// Lowercase, drop punctuation other than apostrophes, collapse whitespace
#[must_use]
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reject transcripts that should never reach the language model
///
/// Returns the trimmed transcript when usable.
///
/// # Errors
///
/// Returns `Error::InvalidInput` for empty, too short or gibberish text
pub fn validate_transcript(text: &str, min_words: usize) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("empty transcript".to_string()));
    }

    let words = normalize(trimmed);
    let count = words.split_whitespace().count();
    if count < min_words {
        return Err(Error::InvalidInput(format!(
            "transcript has {count} words, need {min_words}"
        )));
    }

    if is_gibberish(trimmed) {
        return Err(Error::InvalidInput(format!("gibberish transcript: {trimmed}")));
    }

    Ok(trimmed.to_string())
}

/// Whether the utterance is an explicit request to end the session
#[must_use]
pub fn is_end_phrase(text: &str) -> bool {
    let normalized = normalize(text);
    END_PHRASES.contains(&normalized.as_str())
}

/// Mostly non-letters, or no word that looks pronounceable
#[allow(clippy::cast_precision_loss)]
fn is_gibberish(text: &str) -> bool {
    let visible: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if visible.is_empty() {
        return true;
    }

    let alphabetic = visible.iter().filter(|c| c.is_alphabetic()).count();
    if (alphabetic as f32) / (visible.len() as f32) < 0.5 {
        return true;
    }

    // Non-Latin scripts carry no ASCII vowels; only apply the vowel check to ASCII words
    !normalize(text).split_whitespace().any(|word| {
        !word.is_ascii() || word.chars().any(|c| "aeiouy".contains(c)) || word.chars().all(|c| c.is_ascii_digit())
    })
}
