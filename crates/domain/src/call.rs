//! The call data model: sessions, turns, interrupts, and model choices.
//!
//! Everything here is serde-serializable because these records travel two
//! ways: as projections inside outbound events, and as JSONL rows in the
//! history store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a session is in its lifecycle.
///
/// Within a turn the transitions are monotonic:
/// `speaking_user → thinking → speaking_ai → (speaking_user | ending)`.
/// An auto-interrupt moves `speaking_ai → speaking_user` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Dialing,
    Connected,
    SpeakingUser,
    Thinking,
    SpeakingAi,
    Ending,
    Ended,
}

/// One live (or persisted) phone-call session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub language: String,
    pub kid_friendly: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_hint: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(user_id: &str, language: &str, kid_friendly: bool) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_owned(),
            language: language.to_owned(),
            kid_friendly,
            model_hint: None,
            started_at: Utc::now(),
            ended_at: None,
            status: SessionStatus::Dialing,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who (or what) cut a reply short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    /// Explicit client request.
    Manual,
    /// The user kept talking over the AI long enough.
    Auto,
    /// Session teardown while a turn was in flight.
    System,
}

/// Per-stage latency accounting, integer milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TurnTimings {
    pub stt_ms: u64,
    pub llm_ms: u64,
    pub tts_ms: u64,
    /// Turn start to the first emitted audio chunk, when audio was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_audio_ms: Option<u64>,
}

/// One user utterance and the AI reply it triggered.
///
/// `ai_text` is always the exact concatenation of the chunk text that was
/// emitted to the client, up to completion or the interrupt point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: String,
    pub session_id: String,
    pub user_id: String,
    pub user_text: String,
    pub ai_text: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub interrupted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_kind: Option<InterruptKind>,
    /// The reply was substituted by the content policy's redirect.
    #[serde(default)]
    pub policy_redirected: bool,
    /// Number of audio chunks emitted. Zero with `audio_unavailable` set
    /// means TTS degraded to a text-only reply.
    #[serde(default)]
    pub audio_chunks: u32,
    #[serde(default)]
    pub audio_unavailable: bool,
    pub timings: TurnTimings,
}

impl Turn {
    pub fn new(session_id: &str, user_id: &str) -> Self {
        Self {
            turn_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            user_id: user_id.to_owned(),
            user_text: String::new(),
            ai_text: String::new(),
            started_at: Utc::now(),
            finished_at: None,
            interrupted: false,
            interrupt_kind: None,
            policy_redirected: false,
            audio_chunks: 0,
            audio_unavailable: false,
            timings: TurnTimings::default(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interrupt record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Written when an interrupt fires; mirrored into the affected [`Turn`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptRecord {
    pub session_id: String,
    pub kind: InterruptKind,
    pub triggered_at: DateTime<Utc>,
    pub user_speech_duration_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model choice
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why the router picked a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelReason {
    Default,
    ComplexQuery,
    Fallback,
}

/// The router's per-turn decision. Immutable once computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelChoice {
    pub model_id: String,
    pub reason: ModelReason,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&SessionStatus::SpeakingAi).unwrap();
        assert_eq!(json, "\"speaking_ai\"");
    }

    #[test]
    fn new_turn_is_blank() {
        let turn = Turn::new("s1", "u1");
        assert!(turn.ai_text.is_empty());
        assert!(!turn.interrupted);
        assert!(turn.interrupt_kind.is_none());
        assert!(turn.finished_at.is_none());
    }

    #[test]
    fn turn_round_trips_through_json() {
        let mut turn = Turn::new("s1", "u1");
        turn.user_text = "hello".into();
        turn.ai_text = "hi there".into();
        turn.interrupted = true;
        turn.interrupt_kind = Some(InterruptKind::Auto);
        turn.timings.llm_ms = 420;

        let json = serde_json::to_string(&turn).unwrap();
        let back: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(back.turn_id, turn.turn_id);
        assert_eq!(back.interrupt_kind, Some(InterruptKind::Auto));
        assert_eq!(back.timings.llm_ms, 420);
    }

    #[test]
    fn interrupt_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&InterruptKind::Manual).unwrap(),
            "\"manual\""
        );
        assert_eq!(
            serde_json::to_string(&InterruptKind::Auto).unwrap(),
            "\"auto\""
        );
    }
}
