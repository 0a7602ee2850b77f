//! Shared test harness: scripted adapters (no network) wired into the
//! real pipeline engine, interrupt manager, and history store.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;

use vx_adapters::router::ModelRouter;
use vx_adapters::traits::{GenerateRequest, LlmAdapter, SttAdapter, TtsAdapter};
use vx_domain::call::SessionStatus;
use vx_domain::config::Config;
use vx_domain::error::{Error, Result};
use vx_domain::stream::{AudioChunk, BoxStream, LlmEvent, SttEvent};
use vx_gateway::hub::protocol::ServerEvent;
use vx_gateway::hub::registry::SessionRegistry;
use vx_gateway::interrupt::InterruptManager;
use vx_gateway::pipeline::policy::KidFriendlyPolicy;
use vx_gateway::pipeline::turn::{SessionMeta, TurnDeps};
use vx_gateway::pipeline::{PipelineEngine, PipelineMsg};
use vx_history::CallHistoryStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fake adapters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// STT that reads the "audio" bytes as UTF-8: tests speak by sending
/// text as audio. Yields one partial (the first word) then the final.
pub struct EchoStt {
    pub delay: Duration,
}

#[async_trait::async_trait]
impl SttAdapter for EchoStt {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        _language: &str,
    ) -> Result<BoxStream<'static, Result<SttEvent>>> {
        let text = String::from_utf8_lossy(&audio).trim().to_string();
        let delay = self.delay;
        let stream = async_stream::stream! {
            tokio::time::sleep(delay).await;
            if let Some(first) = text.split_whitespace().next() {
                yield Ok(SttEvent::Partial { text: first.to_string() });
            }
            yield Ok(SttEvent::Final { text });
        };
        Ok(Box::pin(stream))
    }
}

/// One scripted LLM behavior per call, consumed in order. When the
/// script runs dry the adapter answers with a short stock reply.
pub enum LlmScript {
    Reply {
        chunks: Vec<&'static str>,
        delay: Duration,
    },
    FailOpen,
}

pub struct ScriptedLlm {
    scripts: Mutex<VecDeque<LlmScript>>,
    models_called: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(scripts: Vec<LlmScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            models_called: Mutex::new(Vec::new()),
        })
    }

    pub fn models_called(&self) -> Vec<String> {
        self.models_called.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.models_called.lock().len()
    }
}

#[async_trait::async_trait]
impl LlmAdapter for ScriptedLlm {
    async fn generate(
        &self,
        req: GenerateRequest,
    ) -> Result<BoxStream<'static, Result<LlmEvent>>> {
        self.models_called.lock().push(req.choice.model_id.clone());
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(LlmScript::Reply {
                chunks: vec!["ok"],
                delay: Duration::from_millis(1),
            });

        match script {
            LlmScript::FailOpen => Err(Error::Llm("scripted failure".into())),
            LlmScript::Reply { chunks, delay } => {
                let stream = async_stream::stream! {
                    for chunk in chunks {
                        tokio::time::sleep(delay).await;
                        yield Ok(LlmEvent::Token { text: chunk.to_string() });
                    }
                    yield Ok(LlmEvent::Done);
                };
                Ok(Box::pin(stream))
            }
        }
    }
}

/// TTS that emits one audio chunk per text piece it receives (the bytes
/// are the text itself). With `fail` set the stream errors immediately,
/// exercising the text-only degrade path.
pub struct ChunkyTts {
    pub delay: Duration,
    pub fail: bool,
}

#[async_trait::async_trait]
impl TtsAdapter for ChunkyTts {
    async fn synthesize(
        &self,
        text: BoxStream<'static, String>,
        _voice: &str,
        _language: &str,
    ) -> Result<BoxStream<'static, Result<AudioChunk>>> {
        let delay = self.delay;
        let fail = self.fail;
        let stream = async_stream::stream! {
            if fail {
                yield Err(Error::Tts("scripted synthesis failure".into()));
                return;
            }
            let mut text = text;
            use futures_util::StreamExt;
            while let Some(piece) = text.next().await {
                tokio::time::sleep(delay).await;
                yield Ok(AudioChunk {
                    bytes: piece.into_bytes(),
                });
            }
        };
        Ok(Box::pin(stream))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Timings shrunk so scenarios run in tens of milliseconds.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.pipeline.end_of_utterance_ms = 60;
    config.pipeline.auto_interrupt_ms = 150;
    config.pipeline.min_user_speech_duration_ms = 40;
    config.pipeline.cancellation_latency_ms = 30;
    config.history.persist_slo_ms = 200;
    config
}

pub struct Harness {
    pub pipe_tx: mpsc::Sender<PipelineMsg>,
    pub events_rx: mpsc::Receiver<ServerEvent>,
    pub interrupts: Arc<InterruptManager>,
    pub history: Arc<CallHistoryStore>,
    pub session_id: String,
    pub user_id: String,
    seq: AtomicU64,
    driver: Option<tokio::task::JoinHandle<()>>,
    _dir: TempDir,
}

impl Harness {
    pub async fn start(
        config: Config,
        kid_friendly: bool,
        llm: Arc<ScriptedLlm>,
        tts: ChunkyTts,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = config;
        config.history.data_path = dir.path().to_path_buf();
        let config = Arc::new(config);

        let history = Arc::new(CallHistoryStore::open(&config.history).unwrap());
        let interrupts = Arc::new(InterruptManager::new(&config.pipeline));
        let registry = Arc::new(SessionRegistry::new());
        let (events_tx, events_rx) = mpsc::channel(256);

        let session_id = uuid::Uuid::new_v4().to_string();
        let user_id = "test-user".to_string();
        interrupts.create(&session_id);
        interrupts.set_status(&session_id, SessionStatus::Connected);

        let deps = TurnDeps {
            stt: Arc::new(EchoStt {
                delay: Duration::from_millis(5),
            }),
            llm,
            tts: Arc::new(tts),
            router: Arc::new(ModelRouter::from_config(&config.adapters.llm)),
            policy: Arc::new(KidFriendlyPolicy::new()),
            history: history.clone(),
            interrupts: interrupts.clone(),
            registry,
            config: config.clone(),
            events: events_tx,
        };
        let meta = SessionMeta {
            session_id: session_id.clone(),
            user_id: user_id.clone(),
            language: "en".into(),
            kid_friendly,
            model_hint: None,
        };

        let (pipe_tx, pipe_rx) = mpsc::channel(config.pipeline.inbound_queue_size);
        let driver = tokio::spawn(PipelineEngine::new(deps, meta).run(pipe_rx));

        Self {
            pipe_tx,
            events_rx,
            interrupts,
            history,
            session_id,
            user_id,
            seq: AtomicU64::new(0),
            driver: Some(driver),
            _dir: dir,
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn voice(&self, text: &str) {
        self.pipe_tx
            .send(PipelineMsg::Audio {
                bytes: text.as_bytes().to_vec(),
                is_silence: false,
                seq: self.next_seq(),
            })
            .await
            .unwrap();
    }

    pub async fn silence(&self) {
        self.pipe_tx
            .send(PipelineMsg::Audio {
                bytes: Vec::new(),
                is_silence: true,
                seq: self.next_seq(),
            })
            .await
            .unwrap();
    }

    /// One utterance: a voice chunk, then silence; the utterance closes
    /// when the configured silence window elapses.
    pub async fn say(&self, text: &str) {
        self.voice(text).await;
        self.silence().await;
    }

    pub async fn next_event(&mut self) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(3), self.events_rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    /// Collect events up to and including the next `ai_response_complete`.
    pub async fn collect_until_complete(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        loop {
            let event = self.next_event().await;
            let done = matches!(event, ServerEvent::AiResponseComplete { .. });
            events.push(event);
            if done {
                return events;
            }
        }
    }

    /// True when no event arrives within `window`.
    pub async fn quiet_for(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.events_rx.recv())
            .await
            .is_err()
    }

    pub async fn shutdown(mut self) {
        drop(self.pipe_tx);
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
        self.history.shutdown(Duration::from_secs(2)).await;
    }
}

// ── Event helpers ───────────────────────────────────────────────────

pub fn llm_text(events: &[ServerEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::LlmResponseChunk { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

pub fn audio_chunk_count(events: &[ServerEvent]) -> usize {
    events
        .iter()
        .filter(|e| {
            matches!(
                e,
                ServerEvent::StreamingAudioChunk {
                    is_final: false,
                    ..
                }
            )
        })
        .count()
}

pub fn final_transcription(events: &[ServerEvent]) -> Option<&str> {
    events.iter().find_map(|e| match e {
        ServerEvent::Transcription {
            text,
            is_final: true,
        } => Some(text.as_str()),
        _ => None,
    })
}
