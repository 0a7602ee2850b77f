use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Call history persistence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Directory holding `sessions.jsonl` and `turns.jsonl`.
    #[serde(default = "d_data_path")]
    pub data_path: PathBuf,
    /// Longest the live pipeline may block on a history write.
    #[serde(default = "d_50")]
    pub persist_slo_ms: u64,
    /// How long shutdown waits for the write queue to flush.
    #[serde(default = "d_5000")]
    pub shutdown_drain_ms: u64,
    /// Attempts per row before it lands in the durable-later buffer.
    #[serde(default = "d_3")]
    pub write_retries: u32,
    /// Base backoff between write retries; doubles per attempt.
    #[serde(default = "d_100")]
    pub retry_backoff_ms: u64,
    /// Bounded depth of the writer queue.
    #[serde(default = "d_1024")]
    pub queue_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            data_path: d_data_path(),
            persist_slo_ms: 50,
            shutdown_drain_ms: 5000,
            write_retries: 3,
            retry_backoff_ms: 100,
            queue_size: 1024,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_data_path() -> PathBuf {
    PathBuf::from("./data/history")
}
fn d_50() -> u64 {
    50
}
fn d_5000() -> u64 {
    5000
}
fn d_100() -> u64 {
    100
}
fn d_3() -> u32 {
    3
}
fn d_1024() -> usize {
    1024
}
