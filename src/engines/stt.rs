//! Speech-to-text over HTTP

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::request_error;
use crate::cascade::{EngineId, RawRecognition, RawRecognizer, RawScore};
use crate::{Error, Result};

/// Response shapes accepted from STT servers
///
/// Whisper servers report `avg_logprob`, Vosk servers a per-word `result`
/// list; servers that already normalize send `confidence`.
#[derive(Debug, Deserialize)]
struct SttResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    avg_logprob: Option<f32>,
    #[serde(default)]
    result: Vec<VoskWord>,
}

#[derive(Debug, Deserialize)]
struct VoskWord {
    conf: f32,
}

impl SttResponse {
    fn score(&self) -> RawScore {
        if let Some(c) = self.confidence {
            RawScore::Probability(c)
        } else if let Some(lp) = self.avg_logprob {
            RawScore::LogProbability(lp)
        } else if !self.result.is_empty() {
            RawScore::WordConfidences(self.result.iter().map(|w| w.conf).collect())
        } else {
            RawScore::Unscored
        }
    }
}

/// Posts WAV audio to a transcription endpoint
pub struct HttpSttEngine {
    client: reqwest::Client,
    url: String,
    engine: EngineId,
}

impl HttpSttEngine {
    /// Create an engine posting to `url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty
    pub fn new(engine: EngineId, url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(Error::Config(format!("{engine} STT URL required")));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            url,
            engine,
        })
    }
}

#[async_trait]
impl RawRecognizer<[u8]> for HttpSttEngine {
    fn engine_id(&self) -> EngineId {
        self.engine
    }

    async fn recognize(&self, audio: &[u8], timeout: Duration) -> Result<RawRecognition> {
        tracing::debug!(engine = %self.engine, audio_bytes = audio.len(), "starting transcription");

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "audio/wav")
            .timeout(timeout)
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| request_error(self.engine, timeout, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(engine = %self.engine, status = %status, body = %body, "STT server error");
            return Err(Error::engine(self.engine.as_str(), format!("{status}: {body}")));
        }

        let parsed: SttResponse = response
            .json()
            .await
            .map_err(|e| request_error(self.engine, timeout, &e))?;

        let score = parsed.score();
        tracing::info!(engine = %self.engine, transcript = %parsed.text, "transcription complete");
        Ok(RawRecognition::new(parsed.text.trim(), score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whisper_shape_uses_logprob() {
        let r: SttResponse =
            serde_json::from_str(r#"{"text":"hello","avg_logprob":-0.2}"#).unwrap();
        assert_eq!(r.score(), RawScore::LogProbability(-0.2));
    }

    #[test]
    fn vosk_shape_uses_word_confidences() {
        let r: SttResponse = serde_json::from_str(
            r#"{"text":"turn on","result":[{"conf":0.9,"word":"turn"},{"conf":0.7,"word":"on"}]}"#,
        )
        .unwrap();
        assert_eq!(r.score(), RawScore::WordConfidences(vec![0.9, 0.7]));
    }

    #[test]
    fn explicit_confidence_wins() {
        let r: SttResponse =
            serde_json::from_str(r#"{"text":"x","confidence":0.4,"avg_logprob":-3.0}"#).unwrap();
        assert_eq!(r.score(), RawScore::Probability(0.4));

        let r: SttResponse = serde_json::from_str(r#"{"text":""}"#).unwrap();
        assert_eq!(r.score(), RawScore::Unscored);
    }

    #[test]
    fn empty_url_rejected() {
        assert!(HttpSttEngine::new(EngineId::Vosk, "").is_err());
    }
}
