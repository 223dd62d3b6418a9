//! Upstream transport to rooms and clients
//!
//! Messages are published on versioned topics
//! `hearth/v1/{room}/{session}/{kind}` so old subscribers keep working when
//! the schema moves to a new version. In-process fan-out goes through the
//! [`EventBus`]; the WebSocket surface subscribes per session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use tokio::sync::broadcast;

use crate::cascade::EngineId;
use crate::session::SessionState;
use crate::{Error, Result};

/// Topic root
pub const TOPIC_PREFIX: &str = "hearth";

/// Current schema version
pub const PROTOCOL_VERSION: &str = "v1";

/// Message category, last topic segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    State,
    Transcript,
    Response,
    Display,
    Error,
}

impl TopicKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Transcript => "transcript",
            Self::Response => "response",
            Self::Display => "display",
            Self::Error => "error",
        }
    }
}

impl FromStr for TopicKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "state" => Ok(Self::State),
            "transcript" => Ok(Self::Transcript),
            "response" => Ok(Self::Response),
            "display" => Ok(Self::Display),
            "error" => Ok(Self::Error),
            other => Err(Error::InvalidInput(format!("unknown topic kind: {other}"))),
        }
    }
}

/// Address of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub room_id: String,
    pub session_id: String,
    pub kind: TopicKind,
}

impl Topic {
    #[must_use]
    pub fn new(room_id: impl Into<String>, session_id: impl Into<String>, kind: TopicKind) -> Self {
        Self {
            room_id: room_id.into(),
            session_id: session_id.into(),
            kind,
        }
    }

    /// Parse a rendered topic
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for a foreign prefix, another schema
    /// version, or a malformed path
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [prefix, version, room, session, kind]
                if *prefix == TOPIC_PREFIX && !room.is_empty() && !session.is_empty() =>
            {
                if *version != PROTOCOL_VERSION {
                    return Err(Error::InvalidInput(format!(
                        "unsupported topic version: {version}"
                    )));
                }
                Ok(Self::new(*room, *session, kind.parse()?))
            }
            _ => Err(Error::InvalidInput(format!("malformed topic: {s}"))),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{TOPIC_PREFIX}/{PROTOCOL_VERSION}/{}/{}/{}",
            self.room_id,
            self.session_id,
            self.kind.as_str()
        )
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Screen instruction for room displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisplayAction {
    /// Show a text card
    ShowText { title: String, body: String },
    /// Show an entity's state card
    ShowEntity { entity_id: String },
    /// Show a countdown
    ShowTimer {
        seconds: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// Clear the display
    Dismiss,
}

impl DisplayAction {
    /// Decode and validate a client-supplied payload
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for an unknown `type`, missing fields, or
    /// values that fail [`Self::validate`]
    pub fn parse(value: serde_json::Value) -> Result<Self> {
        let action: Self = serde_json::from_value(value)
            .map_err(|e| Error::InvalidInput(format!("invalid display action: {e}")))?;
        action.validate()?;
        Ok(action)
    }

    /// Check payload values
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` describing the bad field
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ShowText { title, body } => {
                if title.trim().is_empty() && body.trim().is_empty() {
                    return Err(Error::InvalidInput("show_text needs a title or body".to_string()));
                }
            }
            Self::ShowEntity { entity_id } => {
                if !is_entity_id(entity_id) {
                    return Err(Error::InvalidInput(format!(
                        "entity id must be domain.object: {entity_id}"
                    )));
                }
            }
            Self::ShowTimer { seconds, .. } => {
                if *seconds == 0 {
                    return Err(Error::InvalidInput("timer must be positive".to_string()));
                }
            }
            Self::Dismiss => {}
        }
        Ok(())
    }
}

/// `domain.object` with both parts non-empty
#[must_use]
pub fn is_entity_id(s: &str) -> bool {
    s.split_once('.').is_some_and(|(domain, object)| {
        !domain.is_empty()
            && !object.is_empty()
            && !object.contains('.')
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    })
}

/// Payload carried on a topic
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportMessage {
    /// Session moved to a new state
    StateChange { state: SessionState },
    /// Speech was transcribed
    Transcript {
        text: String,
        engine: EngineId,
        confidence: f32,
    },
    /// One sentence of a reply
    ResponseStream { sentence: String, sequence_number: u64 },
    /// Sentinel after the last sentence of a reply
    ResponseComplete,
    /// Screen instruction
    DisplayAction { action: DisplayAction },
    /// User-facing failure
    Error { message: String },
    /// The session is gone; nothing more will be published for it
    SessionEnded,
}

impl TransportMessage {
    #[must_use]
    pub const fn kind(&self) -> TopicKind {
        match self {
            Self::StateChange { .. } | Self::SessionEnded => TopicKind::State,
            Self::Transcript { .. } => TopicKind::Transcript,
            Self::ResponseStream { .. } | Self::ResponseComplete => TopicKind::Response,
            Self::DisplayAction { .. } => TopicKind::Display,
            Self::Error { .. } => TopicKind::Error,
        }
    }
}

/// A message with its topic
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub topic: Topic,
    pub message: TransportMessage,
}

/// In-process fan-out of transport messages
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` messages per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to `(room, session)`; returns how many subscribers saw it
    pub fn publish(&self, room_id: &str, session_id: &str, message: TransportMessage) -> usize {
        let topic = Topic::new(room_id, session_id, message.kind());
        tracing::trace!(topic = %topic, "publishing");
        self.tx.send(Envelope { topic, message }).unwrap_or(0)
    }

    /// Every message on the bus
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Messages for one session
    #[must_use]
    pub fn subscribe_session(&self, room_id: &str, session_id: &str) -> SessionEvents {
        SessionEvents {
            rx: self.tx.subscribe(),
            room_id: room_id.to_string(),
            session_id: session_id.to_string(),
            ended: false,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Filtered subscription for one session
pub struct SessionEvents {
    rx: broadcast::Receiver<Envelope>,
    room_id: String,
    session_id: String,
    ended: bool,
}

impl SessionEvents {
    /// Next message for this session
    ///
    /// Yields `SessionEnded` once, then `None`. Also `None` once the bus is
    /// gone.
    pub async fn recv(&mut self) -> Option<TransportMessage> {
        if self.ended {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(envelope)
                    if envelope.topic.room_id == self.room_id
                        && envelope.topic.session_id == self.session_id =>
                {
                    self.ended = envelope.message == TransportMessage::SessionEnded;
                    return Some(envelope.message);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(session_id = %self.session_id, skipped, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
