//! Intent recognition
//!
//! Three tiers resolve what an utterance asks for:
//! - `pattern` - regex rules for common device commands
//! - `llm` - the language model classifies free-form requests
//! - `conversational` - accepts everything, meaning "just talk"
//!
//! A cascade result carrying an [`Action`] is executed against Home
//! Assistant; anything else is answered conversationally.

mod llm;
mod pattern;
mod validate;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use llm::{ConversationalFallback, LlmClassifier};
pub use pattern::{PatternMatcher, PatternRule};
pub use validate::{is_end_phrase, normalize, validate_transcript};

/// A Home Assistant service call resolved from an utterance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    /// Service domain (e.g. `light`)
    pub domain: String,
    /// Service name (e.g. `turn_on`)
    pub service: String,
    /// Entity id or `all`
    pub target: String,
}

impl Action {
    /// Create an action
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            target: target.into(),
        }
    }

    /// Whether `domain` and `service` are plain identifiers that are safe to
    /// place in a service URL path
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        is_identifier(&self.domain) && is_identifier(&self.service)
    }
}

/// `[a-z0-9_]+`
fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} -> {}", self.domain, self.service, self.target)
    }
}
