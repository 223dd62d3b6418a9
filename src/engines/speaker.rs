//! Room speaker over HTTP
//!
//! The speaker service synthesizes and plays the text, answering once the
//! audio has finished. Dropping the request stops playback on the speaker.

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::Synthesizer;
use crate::cascade::EngineId;
use crate::{Error, Result};

#[derive(Serialize)]
struct SpeakRequest<'a> {
    room: &'a str,
    text: &'a str,
    voice: &'a str,
}

/// Synthesizer backed by a speaker HTTP endpoint
pub struct HttpSpeaker {
    client: reqwest::Client,
    url: String,
    voice: String,
    engine: EngineId,
}

impl HttpSpeaker {
    /// Create a speaker for one TTS engine
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty
    pub fn new(engine: EngineId, url: impl Into<String>, voice: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(Error::Config(format!("{engine} speaker URL required")));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            url,
            voice: voice.into(),
            engine,
        })
    }
}

#[async_trait]
impl Synthesizer for HttpSpeaker {
    fn engine_id(&self) -> EngineId {
        self.engine
    }

    async fn synthesize_and_play(
        &self,
        room_id: &str,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<()> {
        let request = SpeakRequest {
            room: room_id,
            text,
            voice: &self.voice,
        };

        let send = self.client.post(&self.url).json(&request).send();

        let response = tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(engine = %self.engine, room = room_id, "playback cancelled");
                return Ok(());
            }
            response = send => response.map_err(|e| Error::engine(self.engine.as_str(), e))?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::engine(self.engine.as_str(), format!("{status}: {body}")));
        }

        Ok(())
    }
}
