//! Voice sessions
//!
//! A session is one interaction lifecycle in a room. It owns its playback
//! queue and sequence allocator, and tracks the current turn through a
//! generation counter: interrupting a session cancels the turn's token,
//! clears the queue and bumps the generation, so late results from the
//! cancelled turn can be recognized and dropped.
//!
//! ```text
//! IDLE ─start/wake─▶ LISTENING ─audio─▶ TRANSCRIBING ─text─▶ MATCHING ─┬─action──▶ EXECUTING ─┐
//!                        ▲                                          └─no action─▶ STREAMING ─┤
//!                        └────────────── multi-turn ◀──────────────────────────────────────┘
//! ```

pub mod dispatcher;
pub mod manager;

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::speech::{PlaybackQueue, SequenceAllocator};
use crate::transport::{EventBus, TransportMessage};
use crate::{Error, Result};

pub use dispatcher::{DispatcherConfig, Phrases, SessionDispatcher, TurnOutcome};
pub use manager::{ManagerConfig, PreemptPolicy, SessionManager, TurnHandle};

/// How long a session lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Ends after one command/reply cycle
    #[default]
    SingleCommand,
    /// Returns to listening until ended
    MultiTurn,
}

impl FromStr for SessionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "single_command" | "single" => Ok(Self::SingleCommand),
            "multi_turn" | "multi" => Ok(Self::MultiTurn),
            other => Err(Error::Config(format!("unknown session mode: {other}"))),
        }
    }
}

/// Dispatcher state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Listening,
    Transcribing,
    Matching,
    Executing,
    Streaming,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Transcribing => "transcribing",
            Self::Matching => "matching",
            Self::Executing => "executing",
            Self::Streaming => "streaming",
        }
    }

    /// Waiting for input rather than working on a turn
    #[must_use]
    pub const fn is_resting(self) -> bool {
        matches!(self, Self::Idle | Self::Listening)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for one turn
#[derive(Debug, Clone)]
pub enum Utterance {
    /// Already transcribed text
    Text(String),
    /// WAV audio for the STT cascade
    Audio(Vec<u8>),
}

/// The current turn's generation and cancellation token
#[derive(Debug, Clone)]
pub struct Turn {
    pub generation: u64,
    pub cancel: CancellationToken,
}

/// Serializable view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub room_id: String,
    pub mode: SessionMode,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub idle_ms: u64,
}

struct Inner {
    state: SessionState,
    generation: u64,
    cancel: CancellationToken,
    last_activity: Instant,
}

/// One live interaction in a room
pub struct Session {
    id: String,
    room_id: String,
    mode: SessionMode,
    started_at: DateTime<Utc>,
    sequence: SequenceAllocator,
    queue: PlaybackQueue,
    bus: EventBus,
    inner: Mutex<Inner>,
    turn_lock: tokio::sync::Mutex<()>,
}

impl Session {
    /// Create an idle session
    #[must_use]
    pub fn new(room_id: impl Into<String>, mode: SessionMode, bus: EventBus) -> Self {
        let sequence = SequenceAllocator::new();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            room_id: room_id.into(),
            mode,
            started_at: Utc::now(),
            queue: PlaybackQueue::new(sequence.clone()),
            sequence,
            bus,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                generation: 0,
                cancel: CancellationToken::new(),
                last_activity: Instant::now(),
            }),
            turn_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    #[must_use]
    pub const fn mode(&self) -> SessionMode {
        self.mode
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    #[must_use]
    pub const fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    #[must_use]
    pub const fn sequence(&self) -> &SequenceAllocator {
        &self.sequence
    }

    /// State a finished turn settles into
    #[must_use]
    pub const fn resting_state(&self) -> SessionState {
        match self.mode {
            SessionMode::SingleCommand => SessionState::Idle,
            SessionMode::MultiTurn => SessionState::Listening,
        }
    }

    /// Publish to this session's topics
    pub fn publish(&self, message: TransportMessage) {
        self.bus.publish(&self.room_id, &self.id, message);
    }

    fn apply_state(&self, inner: &mut Inner, state: SessionState) {
        if inner.state == state {
            return;
        }
        tracing::debug!(session_id = %self.id, room = %self.room_id, from = %inner.state, to = %state, "state change");
        inner.state = state;
        inner.last_activity = Instant::now();
        self.publish(TransportMessage::StateChange { state });
    }

    /// Set the state unconditionally
    pub fn set_state(&self, state: SessionState) {
        let mut inner = self.lock();
        self.apply_state(&mut inner, state);
    }

    /// Set the state if `generation` is still the current turn
    pub fn set_state_for(&self, generation: u64, state: SessionState) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        self.apply_state(&mut inner, state);
        true
    }

    /// Current turn
    #[must_use]
    pub fn current_turn(&self) -> Turn {
        let inner = self.lock();
        Turn {
            generation: inner.generation,
            cancel: inner.cancel.clone(),
        }
    }

    /// Whether `generation` is still the current turn
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Cancel the in-flight turn, clear playback, and start a new generation
    ///
    /// With `rest_in` set the session also moves to that state atomically with
    /// the generation bump.
    pub fn interrupt(&self, rest_in: Option<SessionState>) -> Turn {
        let mut inner = self.lock();
        inner.cancel.cancel();
        inner.cancel = CancellationToken::new();
        inner.generation += 1;
        inner.last_activity = Instant::now();
        let dropped = self.queue.clear();
        if let Some(state) = rest_in {
            self.apply_state(&mut inner, state);
        }

        tracing::debug!(
            session_id = %self.id,
            generation = inner.generation,
            dropped,
            "session interrupted"
        );

        Turn {
            generation: inner.generation,
            cancel: inner.cancel.clone(),
        }
    }

    /// Record activity
    pub fn touch(&self) {
        self.lock().last_activity = Instant::now();
    }

    /// Time since the last activity
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.lock().last_activity.elapsed()
    }

    /// Serialize turns: held for the duration of one dispatcher run
    pub(crate) async fn lock_turn(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.turn_lock.lock().await
    }

    /// Cancel everything and stop playback for good
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.cancel.cancel();
        inner.generation += 1;
        self.queue.close();
        self.apply_state(&mut inner, SessionState::Idle);
        drop(inner);
        self.publish(TransportMessage::SessionEnded);
    }

    #[must_use]
    pub fn info(&self) -> SessionInfo {
        let inner = self.lock();
        SessionInfo {
            id: self.id.clone(),
            room_id: self.room_id.clone(),
            mode: self.mode,
            state: inner.state,
            started_at: self.started_at,
            idle_ms: u64::try_from(inner.last_activity.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}
