//! Hearth Gateway - voice gateway for Home Assistant rooms
//!
//! This library provides the core of the hearth gateway:
//! - Tiered recognition cascades for speech-to-text and intent
//! - A per-room session state machine with barge-in
//! - Streaming replies segmented into sentences and played in order
//! - A versioned room transport and an HTTP/WebSocket surface
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Room clients (HTTP / WS)                │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 SessionManager                       │
//! │   Dispatcher  │  STT cascade  │  Intent cascade     │
//! │   Segmenter   │  PlaybackQueue │ SpeechRouter       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   Vosk / Whisper  │  Ollama  │  Home Assistant  │ TTS│
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod audio;
pub mod cascade;
pub mod config;
pub mod daemon;
pub mod engines;
pub mod error;
pub mod intent;
pub mod session;
pub mod settings;
pub mod speech;
pub mod transport;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
