//! The WebSocket wire protocol: text-framed JSON, one object per message,
//! discriminated by `type`.
//!
//! Outbound events are wrapped in an [`Envelope`] carrying the session id
//! and a per-session `event_seq` assigned by the single writer task, so
//! event order on the wire is total and gap-free.

use serde::{Deserialize, Serialize};

use vx_domain::call::{InterruptKind, TurnTimings};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client → Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SessionStart {
        #[serde(default = "d_language")]
        language: String,
        /// Falls back to `pipeline.kid_friendly_default` when omitted.
        #[serde(default)]
        kid_friendly: Option<bool>,
        #[serde(default)]
        model_hint: Option<String>,
        #[serde(default)]
        user_id: Option<String>,
    },
    AudioData {
        /// Base64-encoded opaque audio bytes.
        chunk: String,
        /// Authoritative voice-activity hint from the client.
        #[serde(default)]
        is_silence: bool,
        #[serde(default)]
        seq: u64,
    },
    UserStopSpeaking,
    Interrupt,
    Ping {
        ts: i64,
    },
    SessionEnd,
}

fn d_language() -> String {
    "en".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server → Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    SessionStarted {
        session_id: String,
    },
    Transcription {
        text: String,
        is_final: bool,
    },
    LlmResponseChunk {
        content: String,
        is_final: bool,
    },
    StreamingAudioChunk {
        chunk_index: u32,
        /// Base64 audio payload; empty on the final marker.
        audio: String,
        is_final: bool,
    },
    AiResponseComplete {
        turn_id: String,
        text: String,
        interrupted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt_kind: Option<InterruptKind>,
        audio_chunks: u32,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        audio_unavailable: bool,
        timings: TurnTimings,
    },
    InterruptConfirmed {
        kind: InterruptKind,
    },
    Error {
        kind: String,
        message: String,
        recoverable: bool,
    },
    Pong {
        ts: i64,
    },
    SessionEnded {
        reason: String,
    },
}

/// The outbound frame: event plus session id and monotone sequence number.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub session_id: String,
    pub event_seq: u64,
    #[serde(flatten)]
    pub event: ServerEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_start_parses_with_defaults() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"session_start"}"#).unwrap();
        match msg {
            ClientMessage::SessionStart {
                language,
                kid_friendly,
                ..
            } => {
                assert_eq!(language, "en");
                assert_eq!(kid_friendly, None);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn audio_data_parses() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"audio_data","chunk":"AAAA","is_silence":false,"seq":3}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::AudioData {
                chunk,
                is_silence,
                seq,
            } => {
                assert_eq!(chunk, "AAAA");
                assert!(!is_silence);
                assert_eq!(seq, 3);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unit_messages_parse() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"interrupt"}"#).is_ok());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"user_stop_speaking"}"#).is_ok());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"session_end"}"#).is_ok());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"warp_drive"}"#).is_err());
    }

    #[test]
    fn envelope_flattens_event_fields() {
        let envelope = Envelope {
            session_id: "s1".into(),
            event_seq: 7,
            event: ServerEvent::InterruptConfirmed {
                kind: InterruptKind::Auto,
            },
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&envelope).unwrap()).unwrap();
        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["event_seq"], 7);
        assert_eq!(json["type"], "interrupt_confirmed");
        assert_eq!(json["kind"], "auto");
    }

    #[test]
    fn complete_event_omits_empty_optionals() {
        let event = ServerEvent::AiResponseComplete {
            turn_id: "t1".into(),
            text: "hi".into(),
            interrupted: false,
            interrupt_kind: None,
            audio_chunks: 2,
            audio_unavailable: false,
            timings: TurnTimings::default(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("interrupt_kind"));
        assert!(!json.contains("audio_unavailable"));
    }
}
