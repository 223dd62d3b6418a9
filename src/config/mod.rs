//! Configuration management for the Hearth gateway
//!
//! Precedence is env > TOML file > defaults. Tier lists are validated on
//! load; a bad cascade is a startup error rather than a runtime surprise.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::cascade::{EngineId, TierSpec, validate_tiers};
use crate::intent::{PatternMatcher, PatternRule};
use crate::session::{DispatcherConfig, ManagerConfig, Phrases, PreemptPolicy, SessionMode};
use crate::speech::SpeechRouter;
use crate::{Error, Result};

use file::{HearthConfigFile, TierFileConfig};

/// Hearth gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,

    /// Speech-to-text cascade
    pub stt: Vec<EngineTier>,

    /// Intent cascade
    pub intent: IntentConfig,

    pub speech: SpeechConfig,

    pub session: SessionConfig,

    pub home_assistant: HomeAssistantConfig,

    pub llm: LlmConfig,

    /// Path to data directory (persisted settings)
    pub data_dir: PathBuf,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (room dashboard)
    pub static_dir: Option<PathBuf>,
}

/// A tier plus the endpoint of its engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineTier {
    pub spec: TierSpec,
    pub url: Option<String>,
}

/// Intent cascade configuration
#[derive(Debug, Clone)]
pub struct IntentConfig {
    pub tiers: Vec<TierSpec>,
    pub patterns: Vec<PatternRule>,
}

/// Reply synthesis configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub router: SpeechRouter,
    /// Speaker endpoint for the low-latency engine
    pub short_url: String,
    /// Speaker endpoint for the high-quality engine
    pub long_url: String,
    pub voice: String,
}

/// Session lifecycle configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    pub reap_interval: Duration,
    pub policy: PreemptPolicy,
    pub wake_mode: SessionMode,
    pub min_words: usize,
    pub min_audio_ms: u64,
    pub phrases: Phrases,
}

/// Home Assistant REST API
#[derive(Debug, Clone)]
pub struct HomeAssistantConfig {
    pub url: String,
    /// Long-lived access token
    pub token: Option<String>,
    pub timeout: Duration,
}

/// Ollama configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub url: String,
    pub model: String,
    pub system_prompt: Option<String>,
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a voice assistant in a smart home. \
Answer in short spoken sentences without markdown.";

fn tier(order: u32, engine: EngineId, confidence_threshold: f32, timeout_ms: u64) -> TierSpec {
    TierSpec {
        order,
        engine,
        confidence_threshold,
        timeout_ms,
    }
}

/// Vosk first, Whisper when Vosk is unsure
fn default_stt_tiers(vosk_url: String, whisper_url: String) -> Vec<EngineTier> {
    vec![
        EngineTier {
            spec: tier(1, EngineId::Vosk, 0.8, 1500),
            url: Some(vosk_url),
        },
        EngineTier {
            spec: tier(2, EngineId::Whisper, 0.5, 5000),
            url: Some(whisper_url),
        },
    ]
}

/// Pattern first, then the LLM classifier, then conversation
fn default_intent_tiers() -> Vec<TierSpec> {
    vec![
        tier(1, EngineId::Pattern, 0.8, 200),
        tier(2, EngineId::Llm, 0.7, 4000),
        tier(3, EngineId::Conversational, 0.0, 100),
    ]
}

fn parse_tier(t: &TierFileConfig) -> Result<EngineTier> {
    Ok(EngineTier {
        spec: tier(t.order, t.engine.parse()?, t.threshold, t.timeout_ms),
        url: t.url.clone(),
    })
}

fn parse_flag<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|s| s.parse().ok())
}

impl Config {
    /// Load configuration from the environment and the TOML file
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a cascade or engine setting is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an env lookup
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a cascade or engine setting is invalid
    #[allow(clippy::too_many_lines)]
    pub fn from_sources(fc: HearthConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Server config (env > toml > default)
        let server = ServerConfig {
            port: parse_flag(env("HEARTH_PORT").or_else(|| env("PORT")))
                .or(fc.server.port)
                .unwrap_or(18800),
            static_dir: env("HEARTH_STATIC_DIR")
                .or(fc.server.static_dir)
                .map(PathBuf::from),
        };

        // STT tiers: file list replaces defaults, env overrides endpoints
        let vosk_url = env("HEARTH_VOSK_URL");
        let whisper_url = env("HEARTH_WHISPER_URL");
        let mut stt = match fc.stt.tiers {
            Some(tiers) => tiers.iter().map(parse_tier).collect::<Result<Vec<_>>>()?,
            None => default_stt_tiers(
                "http://localhost:2700/transcribe".to_string(),
                "http://localhost:9000/asr".to_string(),
            ),
        };
        for t in &mut stt {
            match t.spec.engine {
                EngineId::Vosk if vosk_url.is_some() => t.url.clone_from(&vosk_url),
                EngineId::Whisper if whisper_url.is_some() => t.url.clone_from(&whisper_url),
                _ => {}
            }
        }

        let intent = IntentConfig {
            tiers: match fc.intent.tiers {
                Some(tiers) => tiers
                    .iter()
                    .map(|t| parse_tier(t).map(|e| e.spec))
                    .collect::<Result<Vec<_>>>()?,
                None => default_intent_tiers(),
            },
            patterns: fc.intent.patterns.unwrap_or_else(PatternMatcher::default_rules),
        };

        let short_engine = match fc.speech.short_engine {
            Some(s) => s.parse()?,
            None => EngineId::Vits,
        };
        let long_engine = match fc.speech.long_engine {
            Some(s) => s.parse()?,
            None => EngineId::Xtts,
        };
        let speech = SpeechConfig {
            router: SpeechRouter::new(
                parse_flag(env("HEARTH_WORD_THRESHOLD"))
                    .or(fc.speech.word_threshold)
                    .unwrap_or(SpeechRouter::DEFAULT_WORD_THRESHOLD),
                short_engine,
                long_engine,
            ),
            short_url: env("HEARTH_SPEAKER_URL")
                .or(fc.speech.short_url)
                .unwrap_or_else(|| "http://localhost:5500/speak".to_string()),
            long_url: env("HEARTH_SPEAKER_HQ_URL")
                .or(fc.speech.long_url)
                .unwrap_or_else(|| "http://localhost:5501/speak".to_string()),
            voice: fc.speech.voice.unwrap_or_else(|| "default".to_string()),
        };

        let policy = match env("HEARTH_ROOM_POLICY") {
            Some(p) => match p.to_ascii_lowercase().as_str() {
                "ignore" => PreemptPolicy::Ignore,
                "preempt" => PreemptPolicy::Preempt,
                other => return Err(Error::Config(format!("unknown room policy: {other}"))),
            },
            None => fc.session.policy.unwrap_or_default(),
        };
        let session = SessionConfig {
            idle_timeout: Duration::from_secs(
                parse_flag(env("HEARTH_IDLE_TIMEOUT_SECS"))
                    .or(fc.session.idle_timeout_secs)
                    .unwrap_or(30),
            ),
            reap_interval: Duration::from_secs(fc.session.reap_interval_secs.unwrap_or(5)),
            policy,
            wake_mode: fc.session.wake_mode.unwrap_or_default(),
            min_words: fc.session.min_words.unwrap_or(1),
            min_audio_ms: fc.session.min_audio_ms.unwrap_or(300),
            phrases: fc.session.phrases.unwrap_or_default(),
        };

        let home_assistant = HomeAssistantConfig {
            url: env("HEARTH_HA_URL")
                .or(fc.home_assistant.url)
                .unwrap_or_else(|| "http://homeassistant.local:8123".to_string()),
            token: env("HEARTH_HA_TOKEN")
                .or_else(|| env("HA_TOKEN"))
                .or(fc.home_assistant.token),
            timeout: Duration::from_millis(fc.home_assistant.timeout_ms.unwrap_or(5000)),
        };

        let llm = LlmConfig {
            url: env("HEARTH_OLLAMA_URL")
                .or_else(|| env("OLLAMA_HOST"))
                .or(fc.llm.url)
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            model: env("HEARTH_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| "llama3.2".to_string()),
            system_prompt: Some(
                fc.llm
                    .system_prompt
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            ),
        };

        // Determine data directory (~/.local/share/hearth on Linux)
        let data_dir = env("HEARTH_DATA_DIR")
            .or(fc.server.data_dir)
            .map_or_else(
                || {
                    directories::BaseDirs::new()
                        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("hearth"))
                },
                PathBuf::from,
            );

        let config = Self {
            server,
            stt,
            intent,
            speech,
            session,
            home_assistant,
            llm,
            data_dir,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cascades and engine assignments
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first problem
    pub fn validate(&self) -> Result<()> {
        let stt_specs: Vec<TierSpec> = self.stt.iter().map(|t| t.spec).collect();
        validate_tiers(&stt_specs).map_err(|e| Error::Config(format!("stt: {e}")))?;
        for t in &self.stt {
            if !matches!(t.spec.engine, EngineId::Vosk | EngineId::Whisper) {
                return Err(Error::Config(format!(
                    "stt tier {} uses non-STT engine {}",
                    t.spec.order, t.spec.engine
                )));
            }
            if t.url.as_deref().is_none_or(str::is_empty) {
                return Err(Error::Config(format!(
                    "stt tier {} ({}) has no url",
                    t.spec.order, t.spec.engine
                )));
            }
        }

        validate_tiers(&self.intent.tiers).map_err(|e| Error::Config(format!("intent: {e}")))?;
        for spec in &self.intent.tiers {
            if !matches!(
                spec.engine,
                EngineId::Pattern | EngineId::Llm | EngineId::Conversational
            ) {
                return Err(Error::Config(format!(
                    "intent tier {} uses non-intent engine {}",
                    spec.order, spec.engine
                )));
            }
        }
        PatternMatcher::new(&self.intent.patterns)?;

        let router = self.speech.router;
        for engine in [router.short_engine, router.long_engine] {
            if !matches!(engine, EngineId::Vits | EngineId::Xtts) {
                return Err(Error::Config(format!("{engine} is not a TTS engine")));
            }
        }
        if router.word_threshold == 0 {
            return Err(Error::Config("speech word threshold must be positive".to_string()));
        }

        if self.session.idle_timeout.is_zero() || self.session.reap_interval.is_zero() {
            return Err(Error::Config(
                "session idle timeout and reap interval must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Lifecycle settings for the session manager
    #[must_use]
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            idle_timeout: self.session.idle_timeout,
            reap_interval: self.session.reap_interval,
            policy: self.session.policy,
            wake_mode: self.session.wake_mode,
            router: self.speech.router,
        }
    }

    /// Turn settings for the dispatcher
    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            min_words: self.session.min_words,
            min_audio_ms: self.session.min_audio_ms,
            phrases: self.session.phrases.clone(),
        }
    }
}
