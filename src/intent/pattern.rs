//! Regex intent matcher (tier 1)

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use super::{Action, normalize};
use crate::cascade::{EngineId, RawRecognition, RawRecognizer, RawScore};
use crate::{Error, Result};

/// Nouns that name the device class rather than the device
const CLASS_NOUNS: &[&str] = &[
    "light", "lights", "lamp", "lamps", "switch", "switches", "blind", "blinds", "cover", "covers",
    "curtain", "curtains", "shade", "shades",
];

/// A configured pattern rule
#[derive(Debug, Clone, Deserialize)]
pub struct PatternRule {
    /// Regex applied to the normalized utterance
    pub pattern: String,
    /// Service domain
    pub domain: String,
    /// Service name
    pub service: String,
    /// Fixed entity id; otherwise derived from the `target` capture group
    #[serde(default)]
    pub target: Option<String>,
}

impl PatternRule {
    fn new(pattern: &str, domain: &str, service: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            domain: domain.to_string(),
            service: service.to_string(),
            target: None,
        }
    }
}

#[derive(Debug)]
struct CompiledRule {
    regex: Regex,
    domain: String,
    service: String,
    target: Option<String>,
}

/// Ordered regex rules; the first matching rule wins
#[derive(Debug)]
pub struct PatternMatcher {
    rules: Vec<CompiledRule>,
}

impl PatternMatcher {
    /// Compile a rule list
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a pattern is not a valid regex
    pub fn new(rules: &[PatternRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern).map_err(|e| {
                    Error::Config(format!("invalid intent pattern '{}': {e}", rule.pattern))
                })?;
                Ok(CompiledRule {
                    regex,
                    domain: rule.domain.clone(),
                    service: rule.service.clone(),
                    target: rule.target.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(rules = rules.len(), "pattern matcher compiled");
        Ok(Self { rules })
    }

    /// Built-in rules for lights, switches and covers
    #[must_use]
    pub fn default_rules() -> Vec<PatternRule> {
        vec![
            PatternRule::new(
                r"\b(?:turn|switch) on (?:the )?(?P<target>[\w' ]*?) ?(?:lights?|lamps?)\b",
                "light",
                "turn_on",
            ),
            PatternRule::new(
                r"\b(?:turn|switch) off (?:the )?(?P<target>[\w' ]*?) ?(?:lights?|lamps?)\b",
                "light",
                "turn_off",
            ),
            PatternRule::new(
                r"\btoggle (?:the )?(?P<target>[\w' ]*?) ?(?:lights?|lamps?)\b",
                "light",
                "toggle",
            ),
            PatternRule::new(
                r"\b(?:open|raise) (?:the )?(?P<target>[\w' ]*?) ?(?:blinds?|covers?|curtains?|shades?)\b",
                "cover",
                "open_cover",
            ),
            PatternRule::new(
                r"\b(?:close|lower) (?:the )?(?P<target>[\w' ]*?) ?(?:blinds?|covers?|curtains?|shades?)\b",
                "cover",
                "close_cover",
            ),
            PatternRule::new(
                r"\b(?:turn|switch) on (?:the )?(?P<target>[\w' ]+)$",
                "switch",
                "turn_on",
            ),
            PatternRule::new(
                r"\b(?:turn|switch) off (?:the )?(?P<target>[\w' ]+)$",
                "switch",
                "turn_off",
            ),
            PatternRule::new(r"\btoggle (?:the )?(?P<target>[\w' ]+)$", "switch", "toggle"),
        ]
    }

    /// Matcher over [`Self::default_rules`]
    ///
    /// # Errors
    ///
    /// Never in practice; the built-in patterns are valid
    pub fn with_defaults() -> Result<Self> {
        Self::new(&Self::default_rules())
    }

    /// Match an utterance, returning the action and the share of words the
    /// match covers
    #[must_use]
    pub fn match_text(&self, text: &str) -> Option<(Action, RawScore)> {
        let normalized = normalize(text);
        let total = normalized.split_whitespace().count();

        self.rules.iter().find_map(|rule| {
            let caps = rule.regex.captures(&normalized)?;
            let whole = caps.get(0)?;
            let matched = whole.as_str().split_whitespace().count();

            let target = rule.target.clone().unwrap_or_else(|| {
                let phrase = caps.name("target").map_or("", |m| m.as_str());
                entity_target(&rule.domain, phrase)
            });

            Some((
                Action::new(&rule.domain, &rule.service, target),
                RawScore::MatchRatio { matched, total },
            ))
        })
    }
}

/// Turn a spoken device phrase into an entity id, or `all` when the phrase
/// only names the device class
fn entity_target(domain: &str, phrase: &str) -> String {
    let words: Vec<&str> = phrase
        .split_whitespace()
        .filter(|w| !matches!(*w, "the" | "all" | "my"))
        .filter(|w| !CLASS_NOUNS.contains(w))
        .collect();

    if words.is_empty() {
        "all".to_string()
    } else {
        let slug: String = words.join("_").chars().filter(|c| *c != '\'').collect();
        format!("{domain}.{slug}")
    }
}

#[async_trait]
impl RawRecognizer<str> for PatternMatcher {
    fn engine_id(&self) -> EngineId {
        EngineId::Pattern
    }

    async fn recognize(&self, input: &str, _timeout: Duration) -> Result<RawRecognition> {
        Ok(match self.match_text(input) {
            Some((action, score)) => {
                tracing::debug!(%action, "pattern matched");
                RawRecognition {
                    text: input.to_string(),
                    score,
                    action: Some(action),
                }
            }
            None => RawRecognition::new(
                input,
                RawScore::MatchRatio {
                    matched: 0,
                    total: input.split_whitespace().count(),
                },
            ),
        })
    }
}
