//! TOML configuration file loading
//!
//! Supports `~/.config/hearth/config.toml` (or the path in `HEARTH_CONFIG`)
//! as a persistent config source. All fields are optional; the file is a
//! partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;
use crate::intent::PatternRule;
use crate::session::{Phrases, PreemptPolicy, SessionMode};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct HearthConfigFile {
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Speech-to-text cascade
    #[serde(default)]
    pub stt: CascadeFileConfig,

    /// Intent cascade
    #[serde(default)]
    pub intent: IntentFileConfig,

    /// Reply synthesis
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Session lifecycle
    #[serde(default)]
    pub session: SessionFileConfig,

    #[serde(default)]
    pub home_assistant: HomeAssistantFileConfig,

    #[serde(default)]
    pub llm: LlmFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Static files served at `/`
    pub static_dir: Option<String>,

    /// Where persisted settings live
    pub data_dir: Option<String>,
}

/// One cascade tier
#[derive(Debug, Clone, Deserialize)]
pub struct TierFileConfig {
    pub order: u32,
    /// Engine name (`vosk`, `whisper`, `pattern`, `llm`, `conversational`)
    pub engine: String,
    pub threshold: f32,
    pub timeout_ms: u64,
    /// Endpoint for HTTP engines
    pub url: Option<String>,
}

/// Tier list for a cascade
#[derive(Debug, Default, Deserialize)]
pub struct CascadeFileConfig {
    pub tiers: Option<Vec<TierFileConfig>>,
}

/// Intent cascade plus pattern rules
#[derive(Debug, Default, Deserialize)]
pub struct IntentFileConfig {
    pub tiers: Option<Vec<TierFileConfig>>,

    /// Replaces the built-in rules
    pub patterns: Option<Vec<PatternRule>>,
}

/// Synthesis routing
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Longest sentence in words for the low-latency engine
    pub word_threshold: Option<usize>,
    pub short_engine: Option<String>,
    pub long_engine: Option<String>,
    /// Speaker endpoint for the low-latency engine
    pub short_url: Option<String>,
    /// Speaker endpoint for the high-quality engine
    pub long_url: Option<String>,
    pub voice: Option<String>,
}

/// Session lifecycle
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub idle_timeout_secs: Option<u64>,
    pub reap_interval_secs: Option<u64>,
    pub policy: Option<PreemptPolicy>,
    pub wake_mode: Option<SessionMode>,
    pub min_words: Option<usize>,
    pub min_audio_ms: Option<u64>,
    pub phrases: Option<Phrases>,
}

/// Home Assistant REST API
#[derive(Debug, Default, Deserialize)]
pub struct HomeAssistantFileConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Ollama
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    pub url: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
}

/// Parse a config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn load_config_from(path: &Path) -> Result<HearthConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `HearthConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> HearthConfigFile {
    let Some(path) = config_file_path() else {
        return HearthConfigFile::default();
    };

    if !path.exists() {
        return HearthConfigFile::default();
    }

    match load_config_from(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            HearthConfigFile::default()
        }
    }
}

/// Return the config file path: `$HEARTH_CONFIG` or `~/.config/hearth/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("HEARTH_CONFIG") {
        return Some(PathBuf::from(path));
    }
    directories::BaseDirs::new().map(|d| d.config_dir().join("hearth").join("config.toml"))
}
