//! Tiered recognition cascade
//!
//! A cascade holds an ordered list of engines. Each tier is tried in turn
//! until one reports a confidence at or above its threshold. Timeouts skip to
//! the next tier; any other engine error aborts the evaluation.
//!
//! ```text
//! tier 1 (vosk, >= 0.80) ──low/timeout──▶ tier 2 (whisper, >= 0.50) ──▶ ... ──▶ last result, low_confidence
//!        │ accepted                              │ accepted
//!        ▼                                       ▼
//!     result                                  result
//! ```

pub mod scorer;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::intent::Action;
use crate::{Error, Result};

pub use scorer::{ConfidenceScorer, RawRecognition, RawRecognizer, RawScore, Scored};

/// Identifies a recognition or synthesis engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineId {
    /// Fast local STT
    Vosk,
    /// Accurate STT
    Whisper,
    /// Regex intent matcher
    Pattern,
    /// LLM intent classifier
    Llm,
    /// Accept-everything tier that routes to a conversational reply
    Conversational,
    /// Low-latency TTS
    Vits,
    /// High-quality TTS
    Xtts,
}

impl EngineId {
    /// Stable lowercase name used in logs and config
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vosk => "vosk",
            Self::Whisper => "whisper",
            Self::Pattern => "pattern",
            Self::Llm => "llm",
            Self::Conversational => "conversational",
            Self::Vits => "vits",
            Self::Xtts => "xtts",
        }
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vosk" => Ok(Self::Vosk),
            "whisper" => Ok(Self::Whisper),
            "pattern" => Ok(Self::Pattern),
            "llm" | "ollama" => Ok(Self::Llm),
            "conversational" => Ok(Self::Conversational),
            "vits" | "piper" => Ok(Self::Vits),
            "xtts" => Ok(Self::Xtts),
            other => Err(Error::Config(format!("unknown engine: {other}"))),
        }
    }
}

/// Output of one engine invocation, normalized to a [0, 1] confidence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    /// Recognized text (transcript, or the utterance for intent engines)
    pub text: String,
    /// Normalized confidence
    pub confidence: f32,
    /// Engine that produced the result
    pub engine: EngineId,
    /// Resolved action, intent engines only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    /// Set when no tier accepted and this is the fallback answer
    pub low_confidence: bool,
}

impl RecognitionResult {
    /// Create a result; confidence is clamped into [0, 1]
    #[must_use]
    pub fn new(text: impl Into<String>, confidence: f32, engine: EngineId) -> Self {
        Self {
            text: text.into(),
            confidence: ConfidenceScorer::clamp(confidence),
            engine,
            action: None,
            low_confidence: false,
        }
    }

    /// Attach a resolved action
    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }
}

/// Static configuration of one cascade tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierSpec {
    /// Position in the cascade, lower runs first
    pub order: u32,
    /// Engine to invoke
    pub engine: EngineId,
    /// Minimum confidence for the cascade to stop at this tier
    pub confidence_threshold: f32,
    /// Per-attempt deadline
    pub timeout_ms: u64,
}

impl TierSpec {
    /// Per-attempt deadline as a `Duration`
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Check a tier list: unique ascending orders, thresholds in [0, 1] and
/// non-increasing down the cascade, non-zero timeouts.
///
/// # Errors
///
/// Returns `Error::Config` describing the first violation
pub fn validate_tiers(specs: &[TierSpec]) -> Result<()> {
    if specs.is_empty() {
        return Err(Error::Config("cascade needs at least one tier".to_string()));
    }

    let mut sorted: Vec<&TierSpec> = specs.iter().collect();
    sorted.sort_by_key(|s| s.order);

    for spec in &sorted {
        if !(0.0..=1.0).contains(&spec.confidence_threshold) {
            return Err(Error::Config(format!(
                "tier {} ({}) threshold {} outside [0, 1]",
                spec.order, spec.engine, spec.confidence_threshold
            )));
        }
        if spec.timeout_ms == 0 {
            return Err(Error::Config(format!(
                "tier {} ({}) has a zero timeout",
                spec.order, spec.engine
            )));
        }
    }

    for pair in sorted.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if prev.order == next.order {
            return Err(Error::Config(format!(
                "tiers {} and {} share order {}",
                prev.engine, next.engine, prev.order
            )));
        }
        if next.confidence_threshold > prev.confidence_threshold {
            return Err(Error::Config(format!(
                "tier {} ({}) threshold {} exceeds earlier tier {} ({}) threshold {}",
                next.order,
                next.engine,
                next.confidence_threshold,
                prev.order,
                prev.engine,
                prev.confidence_threshold
            )));
        }
    }

    Ok(())
}

/// An engine the cascade can try
#[async_trait]
pub trait Recognizer<I: ?Sized + Sync>: Send + Sync {
    /// Engine identity, for logging
    fn engine_id(&self) -> EngineId;

    /// Run the engine once
    ///
    /// # Errors
    ///
    /// `Error::EngineTimeout` when the deadline passes, any other error for
    /// an engine outage
    async fn attempt(&self, input: &I, timeout: Duration) -> Result<RecognitionResult>;
}

struct Tier<I: ?Sized + Sync> {
    spec: TierSpec,
    engine: Arc<dyn Recognizer<I>>,
}

/// Ordered fallback over several engines
pub struct TierCascade<I: ?Sized + Sync> {
    name: &'static str,
    tiers: Vec<Tier<I>>,
}

impl<I: ?Sized + Sync> TierCascade<I> {
    /// Build a cascade from tier specs paired with their engines
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the tier list is invalid or an engine does
    /// not match its spec
    pub fn new(name: &'static str, tiers: Vec<(TierSpec, Arc<dyn Recognizer<I>>)>) -> Result<Self> {
        let specs: Vec<TierSpec> = tiers.iter().map(|(s, _)| *s).collect();
        validate_tiers(&specs)?;

        for (spec, engine) in &tiers {
            if spec.engine != engine.engine_id() {
                return Err(Error::Config(format!(
                    "{name} tier {} configured for {} but engine is {}",
                    spec.order,
                    spec.engine,
                    engine.engine_id()
                )));
            }
        }

        let mut tiers: Vec<Tier<I>> = tiers
            .into_iter()
            .map(|(spec, engine)| Tier { spec, engine })
            .collect();
        tiers.sort_by_key(|t| t.spec.order);

        Ok(Self { name, tiers })
    }

    /// Tier specs in evaluation order
    pub fn specs(&self) -> impl Iterator<Item = &TierSpec> {
        self.tiers.iter().map(|t| &t.spec)
    }

    /// Run the cascade
    ///
    /// Stops at the first tier whose confidence meets its threshold. When no
    /// tier accepts, the last obtained result is returned with
    /// `low_confidence` set.
    ///
    /// # Errors
    ///
    /// Propagates the first non-timeout engine error. Returns the last
    /// timeout when every tier timed out and nothing was obtained.
    pub async fn evaluate(&self, input: &I) -> Result<RecognitionResult> {
        let mut last: Option<RecognitionResult> = None;
        let mut last_timeout: Option<Error> = None;

        for tier in &self.tiers {
            let spec = tier.spec;
            let started = Instant::now();

            let outcome = match tokio::time::timeout(
                spec.timeout(),
                tier.engine.attempt(input, spec.timeout()),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::EngineTimeout {
                    engine: spec.engine.to_string(),
                    timeout_ms: spec.timeout_ms,
                }),
            };

            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match outcome {
                Ok(result) => {
                    let accepted = result.confidence >= spec.confidence_threshold;
                    tracing::info!(
                        cascade = self.name,
                        tier = spec.order,
                        engine = %spec.engine,
                        elapsed_ms,
                        confidence = result.confidence,
                        threshold = spec.confidence_threshold,
                        accepted,
                        "tier attempted"
                    );
                    if accepted {
                        return Ok(result);
                    }
                    last = Some(result);
                }
                Err(e) if e.is_timeout() => {
                    tracing::warn!(
                        cascade = self.name,
                        tier = spec.order,
                        engine = %spec.engine,
                        elapsed_ms,
                        "tier timed out, falling through"
                    );
                    last_timeout = Some(e);
                }
                Err(e) => {
                    tracing::error!(
                        cascade = self.name,
                        tier = spec.order,
                        engine = %spec.engine,
                        elapsed_ms,
                        error = %e,
                        "tier failed"
                    );
                    return Err(e);
                }
            }
        }

        match last {
            Some(mut result) => {
                result.low_confidence = true;
                tracing::debug!(
                    cascade = self.name,
                    engine = %result.engine,
                    confidence = result.confidence,
                    "no tier accepted, returning last result"
                );
                Ok(result)
            }
            None => Err(last_timeout.unwrap_or_else(|| {
                Error::Config(format!("{} cascade has no tiers", self.name))
            })),
        }
    }
}
