//! Daemon - the main gateway service
//!
//! Wires configured engines into the recognition cascades, the session
//! manager and the API server, then runs until interrupted.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::api::ApiServerBuilder;
use crate::cascade::{EngineId, Recognizer, Scored, TierCascade};
use crate::engines::{ActionExecutor, HomeAssistantClient, HttpSpeaker, HttpSttEngine, LanguageModel, OllamaClient};
use crate::intent::{Action, ConversationalFallback, LlmClassifier, PatternMatcher};
use crate::session::{SessionDispatcher, SessionManager};
use crate::settings::SettingsStore;
use crate::speech::Synthesizers;
use crate::transport::EventBus;
use crate::{Config, Error, Result};

/// Stands in for Home Assistant when no token is configured
struct UnconfiguredExecutor;

#[async_trait]
impl ActionExecutor for UnconfiguredExecutor {
    async fn execute(&self, action: &Action) -> Result<()> {
        Err(Error::ActionExecution(format!(
            "home assistant not configured, cannot run {action}"
        )))
    }
}

/// The hearth daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    fn llm(&self) -> Result<Arc<dyn LanguageModel>> {
        let mut client = OllamaClient::new(&self.config.llm.url, &self.config.llm.model)?;
        if let Some(prompt) = &self.config.llm.system_prompt {
            client = client.with_system_prompt(prompt);
        }
        tracing::info!(url = %self.config.llm.url, model = %self.config.llm.model, "LLM client initialized");
        Ok(Arc::new(client))
    }

    fn stt_cascade(&self) -> Result<TierCascade<[u8]>> {
        let mut tiers: Vec<(_, Arc<dyn Recognizer<[u8]>>)> = Vec::with_capacity(self.config.stt.len());
        for tier in &self.config.stt {
            let url = tier.url.as_deref().unwrap_or_default();
            let engine = HttpSttEngine::new(tier.spec.engine, url)?;
            let recognizer: Arc<dyn Recognizer<[u8]>> = Arc::new(Scored::new(engine));
            tiers.push((tier.spec, recognizer));
        }
        TierCascade::new("stt", tiers)
    }

    fn intent_cascade(&self, llm: &Arc<dyn LanguageModel>) -> Result<TierCascade<str>> {
        let mut tiers: Vec<(_, Arc<dyn Recognizer<str>>)> = Vec::with_capacity(self.config.intent.tiers.len());
        for spec in &self.config.intent.tiers {
            let recognizer: Arc<dyn Recognizer<str>> = match spec.engine {
                EngineId::Pattern => Arc::new(Scored::new(PatternMatcher::new(&self.config.intent.patterns)?)),
                EngineId::Llm => Arc::new(Scored::new(LlmClassifier::new(Arc::clone(llm)))),
                EngineId::Conversational => Arc::new(ConversationalFallback),
                other => {
                    return Err(Error::Config(format!("{other} cannot run in the intent cascade")));
                }
            };
            tiers.push((*spec, recognizer));
        }
        TierCascade::new("intent", tiers)
    }

    fn executor(&self) -> Result<Arc<dyn ActionExecutor>> {
        let ha = &self.config.home_assistant;
        match ha.token.as_deref() {
            Some(token) if !token.is_empty() => {
                tracing::info!(url = %ha.url, "home assistant client initialized");
                Ok(Arc::new(HomeAssistantClient::new(&ha.url, token, ha.timeout)?))
            }
            _ => {
                tracing::warn!("HEARTH_HA_TOKEN not set - actions will fail");
                Ok(Arc::new(UnconfiguredExecutor))
            }
        }
    }

    fn synthesizers(&self) -> Result<Synthesizers> {
        let speech = &self.config.speech;
        let router = speech.router;
        let mut synthesizers = Synthesizers::new().with(Arc::new(HttpSpeaker::new(
            router.short_engine,
            &speech.short_url,
            &speech.voice,
        )?));
        if router.long_engine != router.short_engine {
            synthesizers = synthesizers.with(Arc::new(HttpSpeaker::new(
                router.long_engine,
                &speech.long_url,
                &speech.voice,
            )?));
        }
        Ok(synthesizers)
    }

    /// Build the session manager from configuration
    ///
    /// # Errors
    ///
    /// Returns error if an engine cannot be constructed
    pub fn build_manager(&self, bus: EventBus) -> Result<SessionManager> {
        let llm = self.llm()?;
        let dispatcher = SessionDispatcher::new(
            Arc::new(self.stt_cascade()?),
            Arc::new(self.intent_cascade(&llm)?),
            llm,
            self.executor()?,
            self.config.dispatcher_config(),
        );

        Ok(SessionManager::new(
            dispatcher,
            self.synthesizers()?,
            bus,
            self.config.manager_config(),
        ))
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if startup fails or the API server stops
    pub async fn run(self) -> Result<()> {
        let manager = self.build_manager(EventBus::default())?;
        let settings = Arc::new(SettingsStore::open(&self.config.data_dir).await);

        let shutdown = CancellationToken::new();
        let reaper = manager.spawn_reaper(shutdown.clone());

        let api = ApiServerBuilder::new(manager.clone(), settings)
            .port(self.config.server.port)
            .static_dir(self.config.server.static_dir.clone())
            .build()
            .spawn();

        tracing::info!(
            port = self.config.server.port,
            stt_tiers = self.config.stt.len(),
            intent_tiers = self.config.intent.tiers.len(),
            policy = ?self.config.session.policy,
            "daemon running"
        );

        let result = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!(error = %e, "failed to listen for ctrl-c");
                }
                tracing::info!("shutdown requested");
                Ok(())
            }
            served = api => match served {
                Ok(result) => result,
                Err(e) => Err(Error::Config(format!("API server task failed: {e}"))),
            },
        };

        shutdown.cancel();
        let _ = reaper.await;
        manager.shutdown().await;
        tracing::info!("daemon stopped");
        result
    }
}
