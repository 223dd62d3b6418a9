//! Ollama language model client

use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use super::{LanguageModel, TokenStream, request_error};
use crate::cascade::EngineId;
use crate::{Error, Result};

/// Upper bound on a streamed reply
const STREAM_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Client for Ollama's `/api/generate`
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    system_prompt: Option<String>,
}

impl OllamaClient {
    /// Create a client
    ///
    /// # Errors
    ///
    /// Returns error if base URL or model is empty
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        let model = model.into();
        if base_url.is_empty() || model.is_empty() {
            return Err(Error::Config("Ollama URL and model required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            system_prompt: None,
        })
    }

    /// Set the system prompt used for conversational replies
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            system: None,
        };

        let response = self
            .client
            .post(self.endpoint())
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error(EngineId::Llm, timeout, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::engine("llm", format!("{status}: {body}")));
        }

        let chunk: GenerateChunk = response
            .json()
            .await
            .map_err(|e| request_error(EngineId::Llm, timeout, &e))?;

        if let Some(err) = chunk.error {
            return Err(Error::engine("llm", err));
        }

        tracing::debug!(model = %self.model, response_len = chunk.response.len(), "completion received");
        Ok(chunk.response)
    }

    async fn stream_tokens(&self, prompt: &str) -> Result<TokenStream> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
            system: self.system_prompt.as_deref(),
        };

        let response = self
            .client
            .post(self.endpoint())
            .timeout(STREAM_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error(EngineId::Llm, STREAM_TIMEOUT, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::engine("llm", format!("{status}: {body}")));
        }

        tracing::debug!(model = %self.model, "reply stream opened");
        Ok(ndjson_tokens(response.bytes_stream()).boxed())
    }
}

struct NdjsonState<S> {
    inner: Pin<Box<S>>,
    buffer: Vec<u8>,
    finished: bool,
}

/// Decode one NDJSON line; blank lines yield nothing
fn parse_line(line: &[u8]) -> Result<Option<GenerateChunk>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let chunk: GenerateChunk = serde_json::from_slice(line)?;
    if let Some(err) = chunk.error {
        return Err(Error::engine("llm", err));
    }
    Ok(Some(chunk))
}

/// Turn an Ollama NDJSON byte stream into text chunks
///
/// Lines may be split across network chunks; bytes are buffered until a
/// newline arrives. The stream ends at the `done` marker or end of input.
pub fn ndjson_tokens<S, B, E>(bytes: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = NdjsonState {
        inner: Box::pin(bytes),
        buffer: Vec::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if st.finished {
                return None;
            }

            if let Some(pos) = st.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = st.buffer.drain(..=pos).collect();
                match parse_line(&line) {
                    Ok(Some(chunk)) => {
                        st.finished = chunk.done;
                        if !chunk.response.is_empty() {
                            return Some((Ok(chunk.response), st));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        st.finished = true;
                        return Some((Err(e), st));
                    }
                }
                continue;
            }

            match st.inner.next().await {
                Some(Ok(bytes)) => st.buffer.extend_from_slice(bytes.as_ref()),
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(Error::engine("llm", e)), st));
                }
                None => {
                    st.finished = true;
                    let rest = std::mem::take(&mut st.buffer);
                    return match parse_line(&rest) {
                        Ok(Some(chunk)) if !chunk.response.is_empty() => {
                            Some((Ok(chunk.response), st))
                        }
                        Ok(_) => None,
                        Err(e) => Some((Err(e), st)),
                    };
                }
            }
        }
    })
}
