//! Shared application state, built once at startup and cloned into every
//! handler. All services are explicit; no module-level singletons.

use std::sync::Arc;

use tokio::sync::mpsc;

use vx_adapters::health::AdapterGate;
use vx_adapters::router::ModelRouter;
use vx_adapters::traits::{LlmAdapter, SttAdapter, TtsAdapter};
use vx_domain::config::Config;
use vx_history::CallHistoryStore;

use crate::hub::protocol::ServerEvent;
use crate::hub::registry::SessionRegistry;
use crate::interrupt::InterruptManager;
use crate::pipeline::policy::ContentPolicy;
use crate::pipeline::turn::TurnDeps;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Session plumbing ──────────────────────────────────────────
    pub registry: Arc<SessionRegistry>,
    pub interrupts: Arc<InterruptManager>,

    // ── Services ──────────────────────────────────────────────────
    pub history: Arc<CallHistoryStore>,
    pub stt: Arc<dyn SttAdapter>,
    pub llm: Arc<dyn LlmAdapter>,
    pub tts: Arc<dyn TtsAdapter>,
    pub router: Arc<ModelRouter>,
    pub policy: Arc<dyn ContentPolicy>,

    /// Adapter health gates, surfaced by `/health`.
    pub gates: Vec<Arc<AdapterGate>>,
}

impl AppState {
    /// Assemble the per-session dependency bundle for a pipeline driver.
    pub fn turn_deps(&self, events: mpsc::Sender<ServerEvent>) -> TurnDeps {
        TurnDeps {
            stt: self.stt.clone(),
            llm: self.llm.clone(),
            tts: self.tts.clone(),
            router: self.router.clone(),
            policy: self.policy.clone(),
            history: self.history.clone(),
            interrupts: self.interrupts.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            events,
        }
    }
}
