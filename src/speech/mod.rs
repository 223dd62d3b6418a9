//! Reply speech pipeline
//!
//! LLM tokens are cut into sentences by the [`SentenceSegmenter`], queued in
//! the [`PlaybackQueue`], and played one at a time by the [`PlaybackLoop`],
//! which asks the [`SpeechRouter`] which synthesizer each sentence gets.

pub mod playback;
pub mod queue;
pub mod router;
pub mod segmenter;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

pub use playback::{PlaybackLoop, Synthesizers};
pub use queue::{PlaybackQueue, QueueProducer};
pub use router::SpeechRouter;
pub use segmenter::SentenceSegmenter;

/// One sentence bound for synthesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    /// Position in the session's reply order
    pub sequence_number: u64,
    /// Sentence text
    pub text: String,
    /// Last segment of a reply
    pub is_final: bool,
}

/// Per-session source of monotonically increasing sequence numbers
///
/// Shared by the segmenter (which stamps segments) and the playback queue
/// (which fences stale numbers after a clear).
#[derive(Debug, Clone, Default)]
pub struct SequenceAllocator {
    next: Arc<AtomicU64>,
}

impl SequenceAllocator {
    /// Start at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next number
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The number the next call to [`Self::allocate`] will return
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    /// Stamp a segment outside the segmenter (acknowledgement phrases)
    pub fn segment(&self, text: impl Into<String>, is_final: bool) -> Segment {
        Segment {
            sequence_number: self.allocate(),
            text: text.into(),
            is_final,
        }
    }
}

/// Count words the way the router and transcript checks do
#[must_use]
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
