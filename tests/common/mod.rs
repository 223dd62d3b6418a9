//! Shared test utilities: scripted engines and a wired session manager

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use hearth_gateway::cascade::{EngineId, RecognitionResult, Recognizer, Scored, TierCascade, TierSpec};
use hearth_gateway::engines::{ActionExecutor, LanguageModel, Synthesizer, TokenStream};
use hearth_gateway::intent::{Action, ConversationalFallback, LlmClassifier, PatternMatcher};
use hearth_gateway::session::{DispatcherConfig, ManagerConfig, SessionDispatcher, SessionManager};
use hearth_gateway::speech::Synthesizers;
use hearth_gateway::transport::{EventBus, SessionEvents, TransportMessage};
use hearth_gateway::{Error, Result};
use tokio_util::sync::CancellationToken;

#[must_use]
pub fn tier(order: u32, engine: EngineId, threshold: f32, timeout_ms: u64) -> TierSpec {
    TierSpec {
        order,
        engine,
        confidence_threshold: threshold,
        timeout_ms,
    }
}

/// Recognizer returning a fixed result after an optional delay
pub struct ScriptedRecognizer {
    engine: EngineId,
    text: String,
    confidence: f32,
    action: Option<Action>,
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn new(engine: EngineId, text: &str, confidence: f32) -> Self {
        Self {
            engine,
            text: text.to_string(),
            confidence,
            action: None,
            delay: Duration::ZERO,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Engine that reports an outage
    pub fn failing(engine: EngineId) -> Self {
        Self {
            fail: true,
            ..Self::new(engine, "", 0.0)
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<I: ?Sized + Sync> Recognizer<I> for ScriptedRecognizer {
    fn engine_id(&self) -> EngineId {
        self.engine
    }

    async fn attempt(&self, _input: &I, _timeout: Duration) -> Result<RecognitionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(Error::engine(self.engine.as_str(), "connection refused"));
        }
        let mut result = RecognitionResult::new(&self.text, self.confidence, self.engine);
        result.action = self.action.clone();
        Ok(result)
    }
}

/// Language model with a canned classification and a scripted token stream
pub struct FakeLlm {
    classification: String,
    tokens: Vec<String>,
    /// Stream stays open after the scripted tokens
    hang: bool,
    fail_stream: bool,
    complete_calls: AtomicUsize,
    stream_calls: AtomicUsize,
}

impl FakeLlm {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            classification: "I am not sure.".to_string(),
            tokens: tokens.iter().map(|t| (*t).to_string()).collect(),
            hang: false,
            fail_stream: false,
            complete_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn classifying(mut self, json: &str) -> Self {
        self.classification = json.to_string();
        self
    }

    #[must_use]
    pub const fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    #[must_use]
    pub const fn failing_stream(mut self) -> Self {
        self.fail_stream = true;
        self
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn complete(&self, _prompt: &str, _timeout: Duration) -> Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.classification.clone())
    }

    async fn stream_tokens(&self, _prompt: &str) -> Result<TokenStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stream {
            return Err(Error::engine("ollama", "model not loaded"));
        }
        let scripted = futures::stream::iter(self.tokens.clone().into_iter().map(Ok));
        Ok(if self.hang {
            scripted.chain(futures::stream::pending()).boxed()
        } else {
            scripted.boxed()
        })
    }
}

/// Executor that records actions
#[derive(Default)]
pub struct RecordingExecutor {
    actions: Mutex<Vec<Action>>,
    fail: AtomicBool,
}

impl RecordingExecutor {
    pub fn failing() -> Self {
        let executor = Self::default();
        executor.fail.store(true, Ordering::SeqCst);
        executor
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn execute(&self, action: &Action) -> Result<()> {
        self.actions.lock().unwrap().push(action.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::ActionExecution(format!("{action}: entity unavailable")));
        }
        Ok(())
    }
}

/// What the room speakers did
#[derive(Default)]
pub struct SpeechLog {
    started: Mutex<Vec<(EngineId, String)>>,
    completed: Mutex<Vec<String>>,
    interrupted: Mutex<Vec<String>>,
    /// Playback holds until cancelled
    block: AtomicBool,
}

impl SpeechLog {
    pub fn blocking() -> Arc<Self> {
        let log = Self::default();
        log.block.store(true, Ordering::SeqCst);
        Arc::new(log)
    }

    pub fn started(&self) -> Vec<(EngineId, String)> {
        self.started.lock().unwrap().clone()
    }

    pub fn started_texts(&self) -> Vec<String> {
        self.started().into_iter().map(|(_, text)| text).collect()
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    pub fn interrupted(&self) -> Vec<String> {
        self.interrupted.lock().unwrap().clone()
    }
}

/// Synthesizer writing to a shared [`SpeechLog`]
pub struct RecordingSynthesizer {
    engine: EngineId,
    log: Arc<SpeechLog>,
}

impl RecordingSynthesizer {
    pub fn new(engine: EngineId, log: Arc<SpeechLog>) -> Self {
        Self { engine, log }
    }
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    fn engine_id(&self) -> EngineId {
        self.engine
    }

    async fn synthesize_and_play(&self, _room_id: &str, text: &str, cancel: CancellationToken) -> Result<()> {
        self.log
            .started
            .lock()
            .unwrap()
            .push((self.engine, text.to_string()));

        if self.log.block.load(Ordering::SeqCst) {
            cancel.cancelled().await;
        } else {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(Duration::from_millis(5)) => {}
            }
        }

        if cancel.is_cancelled() {
            self.log.interrupted.lock().unwrap().push(text.to_string());
        } else {
            self.log.completed.lock().unwrap().push(text.to_string());
        }
        Ok(())
    }
}

/// Short and long speakers over one log
pub fn synthesizers(log: &Arc<SpeechLog>) -> Synthesizers {
    Synthesizers::new()
        .with(Arc::new(RecordingSynthesizer::new(EngineId::Vits, Arc::clone(log))))
        .with(Arc::new(RecordingSynthesizer::new(EngineId::Xtts, Arc::clone(log))))
}

/// A session manager over fake engines
pub struct Harness {
    pub manager: SessionManager,
    pub bus: EventBus,
    pub llm: Arc<FakeLlm>,
    pub executor: Arc<RecordingExecutor>,
    pub speech: Arc<SpeechLog>,
    pub vosk: Arc<ScriptedRecognizer>,
    pub whisper: Arc<ScriptedRecognizer>,
}

pub struct HarnessBuilder {
    llm: FakeLlm,
    executor: RecordingExecutor,
    speech: Arc<SpeechLog>,
    vosk: ScriptedRecognizer,
    whisper: ScriptedRecognizer,
    config: ManagerConfig,
}

impl HarnessBuilder {
    #[must_use]
    pub fn llm(mut self, llm: FakeLlm) -> Self {
        self.llm = llm;
        self
    }

    #[must_use]
    pub fn executor(mut self, executor: RecordingExecutor) -> Self {
        self.executor = executor;
        self
    }

    #[must_use]
    pub fn speech(mut self, speech: Arc<SpeechLog>) -> Self {
        self.speech = speech;
        self
    }

    #[must_use]
    pub fn stt(mut self, vosk: ScriptedRecognizer, whisper: ScriptedRecognizer) -> Self {
        self.vosk = vosk;
        self.whisper = whisper;
        self
    }

    #[must_use]
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Harness {
        let llm = Arc::new(self.llm);
        let executor = Arc::new(self.executor);
        let vosk = Arc::new(self.vosk);
        let whisper = Arc::new(self.whisper);

        let stt = TierCascade::new(
            "stt",
            vec![
                (tier(1, EngineId::Vosk, 0.8, 1500), Arc::clone(&vosk) as Arc<dyn Recognizer<[u8]>>),
                (tier(2, EngineId::Whisper, 0.5, 5000), Arc::clone(&whisper) as Arc<dyn Recognizer<[u8]>>),
            ],
        )
        .unwrap();

        let llm_dyn: Arc<dyn LanguageModel> = Arc::clone(&llm) as Arc<dyn LanguageModel>;
        let intent = TierCascade::new(
            "intent",
            vec![
                (
                    tier(1, EngineId::Pattern, 0.8, 200),
                    Arc::new(Scored::new(PatternMatcher::with_defaults().unwrap())) as Arc<dyn Recognizer<str>>,
                ),
                (
                    tier(2, EngineId::Llm, 0.7, 4000),
                    Arc::new(Scored::new(LlmClassifier::new(Arc::clone(&llm_dyn)))) as Arc<dyn Recognizer<str>>,
                ),
                (
                    tier(3, EngineId::Conversational, 0.0, 100),
                    Arc::new(ConversationalFallback) as Arc<dyn Recognizer<str>>,
                ),
            ],
        )
        .unwrap();

        let dispatcher = SessionDispatcher::new(
            Arc::new(stt),
            Arc::new(intent),
            llm_dyn,
            Arc::clone(&executor) as Arc<dyn ActionExecutor>,
            DispatcherConfig::default(),
        );

        let bus = EventBus::new(1024);
        let manager = SessionManager::new(dispatcher, synthesizers(&self.speech), bus.clone(), self.config);

        Harness {
            manager,
            bus,
            llm,
            executor,
            speech: self.speech,
            vosk,
            whisper,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            llm: FakeLlm::new(&["Sure thing."]),
            executor: RecordingExecutor::default(),
            speech: Arc::new(SpeechLog::default()),
            vosk: ScriptedRecognizer::new(EngineId::Vosk, "turn on the kitchen lights", 0.9),
            whisper: ScriptedRecognizer::new(EngineId::Whisper, "turn on the kitchen lights", 0.9),
            config: ManagerConfig::default(),
        }
    }
}

/// Messages up to and including the next `response_complete`
pub async fn reply_events(events: &mut SessionEvents) -> Vec<TransportMessage> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = events.recv().await {
            let done = msg == TransportMessage::ResponseComplete;
            seen.push(msg);
            if done {
                break;
            }
        }
    })
    .await
    .expect("no response_complete within 5s");
    seen
}

/// Sentences in a list of events
pub fn sentences(events: &[TransportMessage]) -> Vec<String> {
    events
        .iter()
        .filter_map(|m| match m {
            TransportMessage::ResponseStream { sentence, .. } => Some(sentence.clone()),
            _ => None,
        })
        .collect()
}

/// Poll until `check` holds or two seconds pass
pub async fn wait_for(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 2s");
}

/// Silent mono WAV of the given length
pub fn wav(ms: u64) -> Vec<u8> {
    let samples = usize::try_from(u64::from(hearth_gateway::audio::SAMPLE_RATE) * ms / 1000).unwrap();
    hearth_gateway::audio::samples_to_wav(&vec![0.0; samples], hearth_gateway::audio::SAMPLE_RATE).unwrap()
}
