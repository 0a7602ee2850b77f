use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// External adapters: STT / LLM / TTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdaptersConfig {
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub circuit: CircuitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default = "d_stt_url")]
    pub base_url: String,
    #[serde(default = "d_10000")]
    pub timeout_ms: u64,
    /// Capped concurrent requests against this upstream.
    #[serde(default = "d_8")]
    pub pool_size: usize,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_url: d_stt_url(),
            timeout_ms: 10_000,
            pool_size: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_llm_url")]
    pub base_url: String,
    #[serde(default = "d_20000")]
    pub timeout_ms: u64,
    #[serde(default = "d_8")]
    pub pool_size: usize,
    /// The fast small model every turn starts from.
    #[serde(default = "d_default_model")]
    pub default_model: String,
    /// The next-cheaper model the retry path falls back to.
    #[serde(default = "d_fallback_model")]
    pub fallback_model: String,
    /// The escalation model for complex queries.
    #[serde(default = "d_complex_model")]
    pub complex_model: String,
    /// Complexity score (0.0–1.0) above which the router escalates.
    #[serde(default = "d_threshold")]
    pub complexity_threshold: f64,
    #[serde(default = "d_512")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_llm_url(),
            timeout_ms: 20_000,
            pool_size: 8,
            default_model: d_default_model(),
            fallback_model: d_fallback_model(),
            complex_model: d_complex_model(),
            complexity_threshold: d_threshold(),
            max_tokens: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "d_tts_url")]
    pub base_url: String,
    #[serde(default = "d_10000")]
    pub timeout_ms: u64,
    #[serde(default = "d_8")]
    pub pool_size: usize,
    #[serde(default = "d_voice")]
    pub voice: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: d_tts_url(),
            timeout_ms: 10_000,
            pool_size: 8,
            voice: d_voice(),
        }
    }
}

/// Circuit-breaker tuning, shared by all three adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures before the circuit opens.
    #[serde(default = "d_5")]
    pub open_after: u32,
    /// Base cooldown once open; doubles per consecutive open, capped.
    #[serde(default = "d_10000")]
    pub cooldown_ms: u64,
    #[serde(default = "d_60000")]
    pub max_cooldown_ms: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            open_after: 5,
            cooldown_ms: 10_000,
            max_cooldown_ms: 60_000,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_stt_url() -> String {
    "http://127.0.0.1:9101".into()
}
fn d_llm_url() -> String {
    "http://127.0.0.1:9102".into()
}
fn d_tts_url() -> String {
    "http://127.0.0.1:9103".into()
}
fn d_default_model() -> String {
    "swift-mini".into()
}
fn d_fallback_model() -> String {
    "swift-lite".into()
}
fn d_complex_model() -> String {
    "sage-large".into()
}
fn d_voice() -> String {
    "aria".into()
}
fn d_threshold() -> f64 {
    0.6
}
fn d_10000() -> u64 {
    10_000
}
fn d_20000() -> u64 {
    20_000
}
fn d_60000() -> u64 {
    60_000
}
fn d_8() -> usize {
    8
}
fn d_5() -> u32 {
    5
}
fn d_512() -> u32 {
    512
}
