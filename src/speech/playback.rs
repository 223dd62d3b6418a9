//! Playback consumer
//!
//! Pulls segments off a [`PlaybackQueue`] and plays them strictly one after
//! another: segment N+1 is not started until segment N's synthesizer call
//! returns or is cancelled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;

use super::{PlaybackQueue, SpeechRouter};
use crate::cascade::EngineId;
use crate::engines::Synthesizer;

/// Synthesizers keyed by engine id
#[derive(Clone, Default)]
pub struct Synthesizers {
    engines: HashMap<EngineId, Arc<dyn Synthesizer>>,
}

impl Synthesizers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synthesizer under its own engine id
    #[must_use]
    pub fn with(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.engines.insert(synthesizer.engine_id(), synthesizer);
        self
    }

    /// The synthesizer for `engine`, falling back to `fallback` if it is missing
    #[must_use]
    pub fn get(&self, engine: EngineId, fallback: EngineId) -> Option<&Arc<dyn Synthesizer>> {
        self.engines
            .get(&engine)
            .or_else(|| self.engines.get(&fallback))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

/// Consumer task for one session's queue
pub struct PlaybackLoop {
    queue: PlaybackQueue,
    router: SpeechRouter,
    synthesizers: Synthesizers,
    room_id: String,
}

impl PlaybackLoop {
    #[must_use]
    pub fn new(
        queue: PlaybackQueue,
        router: SpeechRouter,
        synthesizers: Synthesizers,
        room_id: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            router,
            synthesizers,
            room_id: room_id.into(),
        }
    }

    /// Run until the queue is closed
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        tracing::debug!(room = %self.room_id, "playback loop started");

        while let Some((segment, cancel)) = self.queue.next().await {
            let engine = self.router.route(&segment);
            let Some(synthesizer) = self.synthesizers.get(engine, self.router.short_engine) else {
                tracing::error!(room = %self.room_id, %engine, "no synthesizer registered, dropping segment");
                self.queue.finish(segment.sequence_number);
                continue;
            };

            let started = Instant::now();
            let result = synthesizer
                .synthesize_and_play(&self.room_id, &segment.text, cancel.clone())
                .await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            if cancel.is_cancelled() {
                tracing::debug!(
                    room = %self.room_id,
                    sequence = segment.sequence_number,
                    elapsed_ms,
                    "playback interrupted"
                );
            } else if let Err(e) = result {
                tracing::warn!(
                    room = %self.room_id,
                    sequence = segment.sequence_number,
                    engine = %synthesizer.engine_id(),
                    error = %e,
                    "synthesis failed"
                );
            } else {
                tracing::debug!(
                    room = %self.room_id,
                    sequence = segment.sequence_number,
                    engine = %synthesizer.engine_id(),
                    elapsed_ms,
                    "segment played"
                );
            }

            self.queue.finish(segment.sequence_number);
        }

        tracing::debug!(room = %self.room_id, "playback loop stopped");
    }
}
