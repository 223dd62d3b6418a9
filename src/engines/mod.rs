//! External collaborators
//!
//! Traits for the services the dispatcher drives, plus HTTP clients for the
//! deployments Hearth runs against:
//! - STT servers (Vosk, Whisper) behind [`HttpSttEngine`]
//! - Ollama behind [`OllamaClient`]
//! - Home Assistant behind [`HomeAssistantClient`]
//! - room speakers behind [`HttpSpeaker`]

mod home_assistant;
mod ollama;
mod speaker;
mod stt;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::cascade::EngineId;
use crate::intent::Action;
use crate::{Error, Result};

pub use home_assistant::HomeAssistantClient;
pub use ollama::{OllamaClient, ndjson_tokens};
pub use speaker::HttpSpeaker;
pub use stt::HttpSttEngine;

/// Incremental text chunks from a streaming generation
pub type TokenStream = BoxStream<'static, Result<String>>;

/// A language model with blocking and streaming completion
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a prompt in one response
    ///
    /// # Errors
    ///
    /// Returns `Error::EngineTimeout` past the deadline, `Error::EngineFailure`
    /// on any other failure
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String>;

    /// Stream a reply as text chunks
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened; failures mid-stream
    /// are yielded as stream items
    async fn stream_tokens(&self, prompt: &str) -> Result<TokenStream>;
}

/// Executes resolved actions
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Run the action
    ///
    /// # Errors
    ///
    /// Returns `Error::ActionExecution` when the action could not be carried out
    async fn execute(&self, action: &Action) -> Result<()>;
}

/// Speaks text in a room
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Engine identity
    fn engine_id(&self) -> EngineId;

    /// Synthesize and play `text`, returning when playback finishes or
    /// `cancel` fires
    ///
    /// # Errors
    ///
    /// Returns an error if synthesis or playback fails
    async fn synthesize_and_play(
        &self,
        room_id: &str,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Classify a request error as a tier timeout or an engine failure
pub(crate) fn request_error(engine: EngineId, timeout: Duration, e: &reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::EngineTimeout {
            engine: engine.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        Error::engine(engine.as_str(), e)
    }
}
