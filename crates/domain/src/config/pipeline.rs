use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline timing and backpressure
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Turn-taking, interrupt, and backpressure tuning.
///
/// All durations are milliseconds. The defaults are calibrated for a
/// phone-call feel: replies start fast, barge-in lands within a beat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Continuous user speech during `speaking_ai` before the auto-interrupt fires.
    #[serde(default = "d_3000")]
    pub auto_interrupt_ms: u64,
    /// Minimum contiguous voiced time before the user counts as speaking.
    #[serde(default = "d_500")]
    pub min_user_speech_duration_ms: u64,
    /// Trailing silence that closes an utterance.
    #[serde(default = "d_700")]
    pub end_of_utterance_ms: u64,
    /// SLO for the first TTS chunk after a turn starts.
    #[serde(default = "d_500")]
    pub first_audio_target_ms: u64,
    /// Internal SLO for the gap between cancellation checkpoints.
    #[serde(default = "d_50")]
    pub cancellation_latency_ms: u64,
    /// Largest accepted inbound audio chunk, decoded bytes.
    #[serde(default = "d_chunk_bytes")]
    pub max_chunk_bytes: usize,
    /// Bounded depth of the per-session inbound audio channel.
    #[serde(default = "d_64")]
    pub inbound_queue_size: usize,
    /// Bounded depth of the per-session outbound event channel.
    #[serde(default = "d_128")]
    pub outbound_queue_size: usize,
    /// Writer stall tolerance before the session is closed as overloaded.
    #[serde(default = "d_5000")]
    pub send_timeout_ms: u64,
    /// Applied when `session_start` omits the kid_friendly flag.
    #[serde(default)]
    pub kid_friendly_default: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_interrupt_ms: 3000,
            min_user_speech_duration_ms: 500,
            end_of_utterance_ms: 700,
            first_audio_target_ms: 500,
            cancellation_latency_ms: 50,
            max_chunk_bytes: 64 * 1024,
            inbound_queue_size: 64,
            outbound_queue_size: 128,
            send_timeout_ms: 5000,
            kid_friendly_default: false,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_3000() -> u64 {
    3000
}
fn d_500() -> u64 {
    500
}
fn d_700() -> u64 {
    700
}
fn d_50() -> u64 {
    50
}
fn d_5000() -> u64 {
    5000
}
fn d_chunk_bytes() -> usize {
    64 * 1024
}
fn d_64() -> usize {
    64
}
fn d_128() -> usize {
    128
}
