//! Room registry and session lifecycle
//!
//! At most one live session per room. Each session gets its own playback
//! loop; turns for a session run one at a time, a newer utterance cancelling
//! the older one first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Session, SessionDispatcher, SessionInfo, SessionMode, SessionState, TurnOutcome, Utterance};
use crate::speech::{PlaybackLoop, SpeechRouter, Synthesizers};
use crate::transport::{DisplayAction, EventBus, TransportMessage};
use crate::{Error, Result};

/// What a start or wake does when the room already has a live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreemptPolicy {
    /// Keep the existing session; explicit starts fail with `RoomBusy`
    Ignore,
    /// Interrupt on wake, replace on explicit start
    #[default]
    Preempt,
}

/// Lifecycle tuning
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Sessions resting longer than this are ended
    pub idle_timeout: Duration,
    /// How often the reaper looks
    pub reap_interval: Duration,
    pub policy: PreemptPolicy,
    /// Mode for sessions opened by a wake event
    pub wake_mode: SessionMode,
    pub router: SpeechRouter,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            reap_interval: Duration::from_secs(5),
            policy: PreemptPolicy::default(),
            wake_mode: SessionMode::default(),
            router: SpeechRouter::default(),
        }
    }
}

struct Entry {
    session: Arc<Session>,
    playback: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    by_id: HashMap<String, Entry>,
    by_room: HashMap<String, String>,
}

impl Registry {
    fn remove(&mut self, session_id: &str) -> Option<Entry> {
        let entry = self.by_id.remove(session_id)?;
        if self
            .by_room
            .get(entry.session.room_id())
            .is_some_and(|id| id == session_id)
        {
            self.by_room.remove(entry.session.room_id());
        }
        Some(entry)
    }

    fn in_room(&self, room_id: &str) -> Option<&Entry> {
        self.by_room.get(room_id).and_then(|id| self.by_id.get(id))
    }
}

struct ManagerInner {
    dispatcher: SessionDispatcher,
    synthesizers: Synthesizers,
    bus: EventBus,
    config: ManagerConfig,
    registry: Mutex<Registry>,
}

/// Owns every live session
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

/// Handle to a running turn
pub struct TurnHandle {
    session_id: String,
    join: JoinHandle<TurnOutcome>,
}

impl TurnHandle {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wait for the turn to end
    pub async fn outcome(self) -> TurnOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "turn task failed");
                TurnOutcome::Failed
            }
        }
    }
}

fn shutdown_entry(entry: Entry) {
    entry.session.shutdown();
    entry.playback.abort();
}

impl SessionManager {
    #[must_use]
    pub fn new(
        dispatcher: SessionDispatcher,
        synthesizers: Synthesizers,
        bus: EventBus,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                dispatcher,
                synthesizers,
                bus,
                config,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    fn open(&self, registry: &mut Registry, room_id: &str, mode: SessionMode) -> Arc<Session> {
        let session = Arc::new(Session::new(room_id, mode, self.inner.bus.clone()));
        let playback = PlaybackLoop::new(
            session.queue().clone(),
            self.inner.config.router,
            self.inner.synthesizers.clone(),
            room_id,
        )
        .spawn();

        registry
            .by_room
            .insert(room_id.to_string(), session.id().to_string());
        registry.by_id.insert(
            session.id().to_string(),
            Entry {
                session: Arc::clone(&session),
                playback,
            },
        );

        session.set_state(SessionState::Listening);
        tracing::info!(session_id = %session.id(), room = room_id, ?mode, "session started");
        session
    }

    /// Open a session in a room
    ///
    /// # Errors
    ///
    /// Returns `Error::RoomBusy` if the room has a live session and the policy
    /// is `Ignore`
    pub async fn start_session(&self, room_id: &str, mode: SessionMode) -> Result<String> {
        if room_id.trim().is_empty() {
            return Err(Error::InvalidInput("room id required".to_string()));
        }

        let mut registry = self.inner.registry.lock().await;

        if let Some(existing) = registry.by_room.get(room_id).cloned() {
            match self.inner.config.policy {
                PreemptPolicy::Ignore => return Err(Error::RoomBusy(room_id.to_string())),
                PreemptPolicy::Preempt => {
                    if let Some(entry) = registry.remove(&existing) {
                        tracing::info!(session_id = %existing, room = room_id, "preempting session");
                        shutdown_entry(entry);
                    }
                }
            }
        }

        let session = self.open(&mut registry, room_id, mode);
        Ok(session.id().to_string())
    }

    /// Wake-word event: barge into the room's session or open one
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for an empty room id
    pub async fn wake(&self, room_id: &str) -> Result<String> {
        if room_id.trim().is_empty() {
            return Err(Error::InvalidInput("room id required".to_string()));
        }

        let mut registry = self.inner.registry.lock().await;

        if let Some(entry) = registry.in_room(room_id) {
            let session = Arc::clone(&entry.session);
            match self.inner.config.policy {
                PreemptPolicy::Ignore => {
                    tracing::debug!(session_id = %session.id(), room = room_id, "wake ignored, session live");
                }
                PreemptPolicy::Preempt => {
                    session.interrupt(Some(SessionState::Listening));
                    tracing::info!(session_id = %session.id(), room = room_id, "wake interrupted session");
                }
            }
            return Ok(session.id().to_string());
        }

        let session = self.open(&mut registry, room_id, self.inner.config.wake_mode);
        Ok(session.id().to_string())
    }

    /// Run an utterance in a session, interrupting any turn in flight
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionNotFound` for an unknown session
    pub async fn submit_utterance(&self, session_id: &str, utterance: Utterance) -> Result<TurnHandle> {
        let session = self
            .session(session_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        let turn = session.interrupt(None);
        let manager = self.clone();
        let task_session = Arc::clone(&session);

        let join = tokio::spawn(async move {
            let session = task_session;
            let outcome = {
                let _guard = session.lock_turn().await;
                if !session.is_current(turn.generation) {
                    return TurnOutcome::Interrupted;
                }
                manager
                    .inner
                    .dispatcher
                    .run_turn(&session, utterance, &turn)
                    .await
            };

            manager.after_turn(&session, turn.generation, outcome).await;
            outcome
        });

        Ok(TurnHandle {
            session_id: session_id.to_string(),
            join,
        })
    }

    async fn after_turn(&self, session: &Session, generation: u64, outcome: TurnOutcome) {
        match outcome {
            TurnOutcome::Interrupted => {}
            TurnOutcome::EndRequested => {
                let _ = self.end_session(session.id()).await;
            }
            _ if session.mode() == SessionMode::SingleCommand => {
                session.queue().idle().await;
                if session.is_current(generation) {
                    let _ = self.end_session(session.id()).await;
                }
            }
            _ => {}
        }
    }

    /// End a session, cancelling its turn and playback
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionNotFound` for an unknown session
    pub async fn end_session(&self, session_id: &str) -> Result<()> {
        let entry = self
            .inner
            .registry
            .lock()
            .await
            .remove(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        tracing::info!(session_id, room = %entry.session.room_id(), "session ended");
        shutdown_entry(entry);
        Ok(())
    }

    /// Publish a display action to the room's live session
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionNotFound` when the room has no live session
    pub async fn display(&self, room_id: &str, action: DisplayAction) -> Result<()> {
        let registry = self.inner.registry.lock().await;
        let entry = registry
            .in_room(room_id)
            .ok_or_else(|| Error::SessionNotFound(format!("no session in room {room_id}")))?;
        entry
            .session
            .publish(TransportMessage::DisplayAction { action });
        Ok(())
    }

    /// Look up a live session
    pub async fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.inner
            .registry
            .lock()
            .await
            .by_id
            .get(session_id)
            .map(|e| Arc::clone(&e.session))
    }

    /// The room's live session id
    pub async fn room_session(&self, room_id: &str) -> Option<String> {
        self.inner.registry.lock().await.by_room.get(room_id).cloned()
    }

    /// Snapshot of every live session
    pub async fn list(&self) -> Vec<SessionInfo> {
        let registry = self.inner.registry.lock().await;
        let mut sessions: Vec<SessionInfo> = registry.by_id.values().map(|e| e.session.info()).collect();
        sessions.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        sessions
    }

    /// End sessions resting past the idle timeout; returns their ids
    pub async fn reap_idle(&self) -> Vec<String> {
        let timeout = self.inner.config.idle_timeout;
        let stale: Vec<String> = {
            let registry = self.inner.registry.lock().await;
            registry
                .by_id
                .values()
                .filter(|e| {
                    let s = &e.session;
                    s.state().is_resting()
                        && s.queue().is_empty()
                        && s.queue().active().is_none()
                        && s.idle_for() >= timeout
                })
                .map(|e| e.session.id().to_string())
                .collect()
        };

        for id in &stale {
            tracing::info!(session_id = %id, idle_timeout_secs = timeout.as_secs(), "ending idle session");
            let _ = self.end_session(id).await;
        }
        stale
    }

    /// Sweep idle sessions until `shutdown` fires
    #[must_use]
    pub fn spawn_reaper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.inner.config.reap_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        manager.reap_idle().await;
                    }
                }
            }
            tracing::debug!("idle reaper stopped");
        })
    }

    /// End every session
    pub async fn shutdown(&self) {
        let entries: Vec<Entry> = {
            let mut registry = self.inner.registry.lock().await;
            registry.by_room.clear();
            registry.by_id.drain().map(|(_, e)| e).collect()
        };
        for entry in entries {
            shutdown_entry(entry);
        }
    }
}
