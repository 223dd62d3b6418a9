//! Per-turn state machine
//!
//! Drives one utterance through transcription, intent matching, and either
//! action execution or a streamed conversational reply. Every failure ends in
//! a short spoken phrase and a resting state; nothing here panics or
//! propagates past the turn.

use std::sync::Arc;

use futures::StreamExt;
use serde::Deserialize;

use super::{Session, SessionState, Turn, Utterance};
use crate::audio;
use crate::cascade::TierCascade;
use crate::engines::{ActionExecutor, LanguageModel};
use crate::intent::{Action, is_end_phrase, validate_transcript};
use crate::speech::{QueueProducer, SentenceSegmenter};
use crate::transport::{DisplayAction, TransportMessage, is_entity_id};

/// Fixed replies
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Phrases {
    /// After a successful action
    pub acknowledgement: String,
    /// Unusable transcript
    pub not_understood: String,
    /// Engine failure
    pub error: String,
    /// Action execution failure
    pub action_failed: String,
}

impl Default for Phrases {
    fn default() -> Self {
        Self {
            acknowledgement: "Done".to_string(),
            not_understood: "I don't understand".to_string(),
            error: "Sorry, something went wrong".to_string(),
            action_failed: "Sorry, I couldn't do that".to_string(),
        }
    }
}

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Transcripts with fewer words are not understood
    pub min_words: usize,
    /// Shorter audio is rejected before STT
    pub min_audio_ms: u64,
    pub phrases: Phrases,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            min_words: 1,
            min_audio_ms: 300,
            phrases: Phrases::default(),
        }
    }
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Action executed and acknowledged
    Executed,
    /// Conversational reply streamed
    Replied,
    /// Transcript or audio unusable
    NotUnderstood,
    /// Action executor refused
    ActionFailed,
    /// Engine outage
    Failed,
    /// User asked to end the session
    EndRequested,
    /// Superseded by a newer utterance, wake, or end
    Interrupted,
}

/// Collaborators for running turns
pub struct SessionDispatcher {
    stt: Arc<TierCascade<[u8]>>,
    intent: Arc<TierCascade<str>>,
    llm: Arc<dyn LanguageModel>,
    executor: Arc<dyn ActionExecutor>,
    config: DispatcherConfig,
}

impl SessionDispatcher {
    #[must_use]
    pub fn new(
        stt: Arc<TierCascade<[u8]>>,
        intent: Arc<TierCascade<str>>,
        llm: Arc<dyn LanguageModel>,
        executor: Arc<dyn ActionExecutor>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            stt,
            intent,
            llm,
            executor,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run one utterance to completion or until the turn is cancelled
    pub async fn run_turn(&self, session: &Session, utterance: Utterance, turn: &Turn) -> TurnOutcome {
        session.touch();

        let outcome = tokio::select! {
            biased;
            () = turn.cancel.cancelled() => TurnOutcome::Interrupted,
            outcome = self.drive(session, utterance, turn) => outcome,
        };

        tracing::info!(
            session_id = %session.id(),
            room = %session.room_id(),
            generation = turn.generation,
            ?outcome,
            "turn finished"
        );
        outcome
    }

    async fn drive(&self, session: &Session, utterance: Utterance, turn: &Turn) -> TurnOutcome {
        let producer = session.queue().producer();

        let transcript = match utterance {
            Utterance::Text(text) => text,
            Utterance::Audio(bytes) => {
                session.set_state_for(turn.generation, SessionState::Transcribing);
                match self.transcribe(session, &bytes).await {
                    Ok(text) => text,
                    Err(outcome) => {
                        let phrase = if outcome == TurnOutcome::NotUnderstood {
                            &self.config.phrases.not_understood
                        } else {
                            &self.config.phrases.error
                        };
                        return self.reply(session, turn, &producer, phrase, outcome);
                    }
                }
            }
        };

        if is_end_phrase(&transcript) {
            tracing::info!(session_id = %session.id(), "end phrase heard");
            return TurnOutcome::EndRequested;
        }

        let text = match validate_transcript(&transcript, self.config.min_words) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(session_id = %session.id(), error = %e, "transcript rejected");
                return self.reply(
                    session,
                    turn,
                    &producer,
                    &self.config.phrases.not_understood,
                    TurnOutcome::NotUnderstood,
                );
            }
        };

        session.set_state_for(turn.generation, SessionState::Matching);
        let intent = match self.intent.evaluate(&text).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(session_id = %session.id(), error = %e, "intent cascade failed");
                return self.reply(session, turn, &producer, &self.config.phrases.error, TurnOutcome::Failed);
            }
        };

        match intent.action {
            Some(action) if !intent.low_confidence => {
                self.execute(session, turn, &producer, &action).await
            }
            _ => self.stream_reply(session, turn, &producer, &text).await,
        }
    }

    /// Run the STT cascade; `Err` carries the outcome to report
    async fn transcribe(&self, session: &Session, bytes: &[u8]) -> Result<String, TurnOutcome> {
        if let Err(e) = audio::validate_wav(bytes, self.config.min_audio_ms) {
            tracing::debug!(session_id = %session.id(), error = %e, "audio rejected");
            return Err(TurnOutcome::NotUnderstood);
        }

        match self.stt.evaluate(bytes).await {
            Ok(result) => {
                session.publish(TransportMessage::Transcript {
                    text: result.text.clone(),
                    engine: result.engine,
                    confidence: result.confidence,
                });
                Ok(result.text)
            }
            Err(e) => {
                tracing::error!(session_id = %session.id(), error = %e, "STT cascade failed");
                Err(TurnOutcome::Failed)
            }
        }
    }

    async fn execute(
        &self,
        session: &Session,
        turn: &Turn,
        producer: &QueueProducer,
        action: &Action,
    ) -> TurnOutcome {
        session.set_state_for(turn.generation, SessionState::Executing);

        match self.executor.execute(action).await {
            Ok(()) => {
                tracing::info!(session_id = %session.id(), %action, "action executed");
                if is_entity_id(&action.target) {
                    session.publish(TransportMessage::DisplayAction {
                        action: DisplayAction::ShowEntity {
                            entity_id: action.target.clone(),
                        },
                    });
                }
                self.reply(
                    session,
                    turn,
                    producer,
                    &self.config.phrases.acknowledgement,
                    TurnOutcome::Executed,
                )
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id(), %action, error = %e, "action failed");
                self.reply(
                    session,
                    turn,
                    producer,
                    &self.config.phrases.action_failed,
                    TurnOutcome::ActionFailed,
                )
            }
        }
    }

    async fn stream_reply(
        &self,
        session: &Session,
        turn: &Turn,
        producer: &QueueProducer,
        text: &str,
    ) -> TurnOutcome {
        session.set_state_for(turn.generation, SessionState::Streaming);

        let tokens = match self.llm.stream_tokens(text).await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::error!(session_id = %session.id(), error = %e, "reply stream failed to open");
                return self.reply(session, turn, producer, &self.config.phrases.error, TurnOutcome::Failed);
            }
        };

        let segments = SentenceSegmenter::new(session.sequence().clone()).segments(tokens);
        let mut segments = std::pin::pin!(segments);
        let mut emitted = 0usize;

        while let Some(item) = segments.next().await {
            match item {
                Ok(segment) => {
                    let (sentence, sequence_number) = (segment.text.clone(), segment.sequence_number);
                    if let Err(e) = producer.enqueue(segment) {
                        tracing::debug!(session_id = %session.id(), error = %e, "dropping stale segment");
                        return TurnOutcome::Interrupted;
                    }
                    session.touch();
                    session.publish(TransportMessage::ResponseStream {
                        sentence,
                        sequence_number,
                    });
                    emitted += 1;
                }
                Err(e) => {
                    tracing::warn!(session_id = %session.id(), error = %e, emitted, "reply stream broke");
                    if emitted == 0 {
                        return self.reply(session, turn, producer, &self.config.phrases.error, TurnOutcome::Failed);
                    }
                    break;
                }
            }
        }

        session.publish(TransportMessage::ResponseComplete);
        session.set_state_for(turn.generation, session.resting_state());
        TurnOutcome::Replied
    }

    /// Speak a fixed phrase as a single segment and settle
    fn reply(
        &self,
        session: &Session,
        turn: &Turn,
        producer: &QueueProducer,
        phrase: &str,
        outcome: TurnOutcome,
    ) -> TurnOutcome {
        let segment = session.sequence().segment(phrase, true);
        let sequence_number = segment.sequence_number;

        if let Err(e) = producer.enqueue(segment) {
            tracing::debug!(session_id = %session.id(), error = %e, "dropping stale reply");
            return TurnOutcome::Interrupted;
        }

        if outcome == TurnOutcome::Failed {
            session.publish(TransportMessage::Error {
                message: phrase.to_string(),
            });
        }
        session.publish(TransportMessage::ResponseStream {
            sentence: phrase.to_string(),
            sequence_number,
        });
        session.publish(TransportMessage::ResponseComplete);
        session.set_state_for(turn.generation, session.resting_state());
        outcome
    }
}
