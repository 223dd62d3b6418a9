//! Synthesizer selection by sentence length

use serde::{Deserialize, Serialize};

use super::{Segment, word_count};
use crate::cascade::EngineId;

/// Picks the low-latency engine for short sentences, the high-quality engine
/// otherwise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechRouter {
    /// Longest sentence, in words, that goes to the short-form engine
    pub word_threshold: usize,
    /// Low-latency engine
    pub short_engine: EngineId,
    /// High-quality engine
    pub long_engine: EngineId,
}

impl SpeechRouter {
    /// Default word threshold
    pub const DEFAULT_WORD_THRESHOLD: usize = 15;

    #[must_use]
    pub const fn new(word_threshold: usize, short_engine: EngineId, long_engine: EngineId) -> Self {
        Self {
            word_threshold,
            short_engine,
            long_engine,
        }
    }

    /// Engine for a segment
    #[must_use]
    pub fn route(&self, segment: &Segment) -> EngineId {
        if word_count(&segment.text) <= self.word_threshold {
            self.short_engine
        } else {
            self.long_engine
        }
    }
}

impl Default for SpeechRouter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WORD_THRESHOLD, EngineId::Vits, EngineId::Xtts)
    }
}
