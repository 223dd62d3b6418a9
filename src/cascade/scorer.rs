//! Confidence normalization
//!
//! Engines report scores in different shapes: Vosk gives per-word
//! confidences, Whisper an average log probability, the pattern matcher a
//! match ratio. The scorer maps all of them into [0, 1] so one threshold
//! scale applies across a cascade.

use std::time::Duration;

use async_trait::async_trait;

use super::{EngineId, RecognitionResult, Recognizer};
use crate::Result;
use crate::intent::Action;

/// Raw score as reported by an engine
#[derive(Debug, Clone, PartialEq)]
pub enum RawScore {
    /// Already a probability
    Probability(f32),
    /// Natural-log probability (e.g. Whisper `avg_logprob`)
    LogProbability(f32),
    /// Per-word confidences (e.g. Vosk `result[].conf`)
    WordConfidences(Vec<f32>),
    /// Share of utterance words covered by a match
    MatchRatio { matched: usize, total: usize },
    /// Engine reported nothing
    Unscored,
}

/// Maps raw engine scores into [0, 1]
pub struct ConfidenceScorer;

impl ConfidenceScorer {
    /// Normalize a raw score
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(raw: &RawScore) -> f32 {
        let value = match raw {
            RawScore::Probability(p) => *p,
            RawScore::LogProbability(lp) => lp.min(0.0).exp(),
            RawScore::WordConfidences(words) => {
                if words.is_empty() {
                    0.0
                } else {
                    words.iter().map(|c| Self::clamp(*c)).sum::<f32>() / words.len() as f32
                }
            }
            RawScore::MatchRatio { matched, total } => {
                if *total == 0 {
                    0.0
                } else {
                    (*matched).min(*total) as f32 / *total as f32
                }
            }
            RawScore::Unscored => 0.0,
        };
        Self::clamp(value)
    }

    /// Clamp into [0, 1]; NaN becomes 0
    #[must_use]
    pub fn clamp(value: f32) -> f32 {
        if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
    }
}

/// Engine output before normalization
#[derive(Debug, Clone)]
pub struct RawRecognition {
    pub text: String,
    pub score: RawScore,
    pub action: Option<Action>,
}

impl RawRecognition {
    /// Plain text output with a raw score
    #[must_use]
    pub fn new(text: impl Into<String>, score: RawScore) -> Self {
        Self {
            text: text.into(),
            score,
            action: None,
        }
    }
}

/// An engine that reports raw, engine-specific scores
#[async_trait]
pub trait RawRecognizer<I: ?Sized + Sync>: Send + Sync {
    /// Engine identity
    fn engine_id(&self) -> EngineId;

    /// Run the engine
    ///
    /// # Errors
    ///
    /// Returns an error if the engine call fails or times out
    async fn recognize(&self, input: &I, timeout: Duration) -> Result<RawRecognition>;
}

/// Adapts a [`RawRecognizer`] into a cascade [`Recognizer`]
pub struct Scored<E> {
    inner: E,
}

impl<E> Scored<E> {
    /// Wrap a raw engine
    pub const fn new(inner: E) -> Self {
        Self { inner }
    }

    /// The wrapped engine
    pub const fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<I, E> Recognizer<I> for Scored<E>
where
    I: ?Sized + Sync,
    E: RawRecognizer<I>,
{
    fn engine_id(&self) -> EngineId {
        self.inner.engine_id()
    }

    async fn attempt(&self, input: &I, timeout: Duration) -> Result<RecognitionResult> {
        let raw = self.inner.recognize(input, timeout).await?;
        let confidence = ConfidenceScorer::score(&raw.score);
        tracing::trace!(engine = %self.inner.engine_id(), raw = ?raw.score, confidence, "scored");

        let mut result = RecognitionResult::new(raw.text, confidence, self.inner.engine_id());
        result.action = raw.action;
        Ok(result)
    }
}
