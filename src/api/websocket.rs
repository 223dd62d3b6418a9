//! WebSocket feed for room clients
//!
//! Pushes reply sentences, the completion sentinel and state changes for one
//! session. Clients may also submit text utterances over the socket.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{ApiError, ApiState};
use crate::cascade::EngineId;
use crate::session::{SessionState, Utterance};
use crate::transport::{DisplayAction, TransportMessage};

/// Incoming WebSocket message from client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsIncoming {
    /// Typed utterance
    Utterance { text: String },
    /// Ping to keep connection alive
    Ping,
}

/// Outgoing WebSocket message to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutgoing {
    /// One reply sentence, in playback order
    Sentence { sentence: String, sequence_number: u64 },
    /// Reply finished
    Complete,
    /// Session state changed
    State { state: SessionState },
    /// Transcript (debug only)
    Transcript {
        text: String,
        engine: EngineId,
        confidence: f32,
    },
    /// Screen instruction
    Display { action: DisplayAction },
    /// Error occurred
    Error { code: String, message: String },
    /// Pong response
    Pong,
    /// Connection established
    Connected { session_id: String },
    /// Session is over; the server closes the socket next
    Ended,
}

impl WsOutgoing {
    /// Map a bus message; transcripts only reach clients with debug on
    #[must_use]
    pub fn from_transport(message: TransportMessage, debug_enabled: bool) -> Option<Self> {
        Some(match message {
            TransportMessage::ResponseStream {
                sentence,
                sequence_number,
            } => Self::Sentence {
                sentence,
                sequence_number,
            },
            TransportMessage::ResponseComplete => Self::Complete,
            TransportMessage::StateChange { state } => Self::State { state },
            TransportMessage::Transcript {
                text,
                engine,
                confidence,
            } => {
                if !debug_enabled {
                    return None;
                }
                Self::Transcript {
                    text,
                    engine,
                    confidence,
                }
            }
            TransportMessage::DisplayAction { action } => Self::Display { action },
            TransportMessage::Error { message } => Self::Error {
                code: "turn_failed".to_string(),
                message,
            },
            TransportMessage::SessionEnded => Self::Ended,
        })
    }
}

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/sessions/{session_id}", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(session) = state.manager.session(&session_id).await else {
        return ApiError::NotFound(format!("session not found: {session_id}")).into_response();
    };
    let room_id = session.room_id().to_string();
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id, room_id))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>, session_id: String, room_id: String) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribed before `connected` goes out
    let mut events = state.manager.bus().subscribe_session(&room_id, &session_id);

    let connected = WsOutgoing::Connected {
        session_id: session_id.clone(),
    };
    if let Ok(msg) = serde_json::to_string(&connected) {
        if sender.send(Message::Text(msg.into())).await.is_err() {
            return;
        }
    }

    tracing::info!(session_id = %session_id, room = %room_id, "WebSocket connected");

    let (tx, mut rx) = mpsc::channel::<WsOutgoing>(64);

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let events_tx = tx.clone();
    let settings = Arc::clone(&state.settings);
    let mut event_task = tokio::spawn(async move {
        while let Some(message) = events.recv().await {
            let debug_enabled = settings.get().await.debug_enabled;
            if let Some(out) = WsOutgoing::from_transport(message, debug_enabled) {
                if events_tx.send(out).await.is_err() {
                    break;
                }
            }
        }
    });

    let recv_state = Arc::clone(&state);
    let recv_session = session_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Err(e) = handle_message(&text, &recv_state, &recv_session, &tx).await {
                        let error = WsOutgoing::Error {
                            code: "bad_request".to_string(),
                            message: e.to_string(),
                        };
                        let _ = tx.send(error).await;
                    }
                }
                Message::Close(_) => {
                    tracing::info!(session_id = %recv_session, "WebSocket closed by client");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            event_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
            event_task.abort();
        }
        _ = &mut event_task => {
            // Session ended: flush what is queued, then close
            recv_task.abort();
            let _ = recv_task.await;
            let _ = send_task.await;
        }
    }

    if state.manager.end_session(&session_id).await.is_ok() {
        tracing::info!(session_id = %session_id, "session ended on disconnect");
    }

    tracing::info!(session_id = %session_id, "WebSocket disconnected");
}

/// Handle a single incoming message
async fn handle_message(
    text: &str,
    state: &ApiState,
    session_id: &str,
    tx: &mpsc::Sender<WsOutgoing>,
) -> crate::Result<()> {
    let incoming: WsIncoming = serde_json::from_str(text)
        .map_err(|e| crate::Error::InvalidInput(format!("invalid message: {e}")))?;

    match incoming {
        WsIncoming::Ping => {
            tx.send(WsOutgoing::Pong)
                .await
                .map_err(|_| crate::Error::InvalidInput("channel closed".to_string()))?;
        }
        WsIncoming::Utterance { text } => {
            state
                .manager
                .submit_utterance(session_id, Utterance::Text(text))
                .await?;
        }
    }

    Ok(())
}
