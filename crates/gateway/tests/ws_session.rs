//! Wire-level tests: a real axum server, a real WebSocket client, and
//! the envelope guarantees (total order, gap-free event_seq, per-session
//! isolation).

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use common::*;
use vx_adapters::router::ModelRouter;
use vx_gateway::api;
use vx_gateway::hub::registry::SessionRegistry;
use vx_gateway::interrupt::InterruptManager;
use vx_gateway::pipeline::policy::KidFriendlyPolicy;
use vx_gateway::state::AppState;
use vx_history::CallHistoryStore;

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_server(llm: Arc<ScriptedLlm>) -> (SocketAddr, AppState, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut config = fast_config();
    config.history.data_path = dir.path().to_path_buf();
    let config = Arc::new(config);

    let state = AppState {
        config: config.clone(),
        registry: Arc::new(SessionRegistry::new()),
        interrupts: Arc::new(InterruptManager::new(&config.pipeline)),
        history: Arc::new(CallHistoryStore::open(&config.history).unwrap()),
        stt: Arc::new(EchoStt {
            delay: Duration::from_millis(5),
        }),
        llm,
        tts: Arc::new(ChunkyTts {
            delay: Duration::from_millis(2),
            fail: false,
        }),
        router: Arc::new(ModelRouter::from_config(&config.adapters.llm)),
        policy: Arc::new(KidFriendlyPolicy::new()),
        gates: Vec::new(),
    };

    let app = api::router().with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state, dir)
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/phone/stream"))
        .await
        .expect("websocket connect");
    ws
}

async fn send_json(ws: &mut WsClient, value: serde_json::Value) {
    ws.send(WsMessage::Text(value.to_string())).await.unwrap();
}

async fn next_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

fn audio_message(text: &str, is_silence: bool, seq: u64) -> serde_json::Value {
    serde_json::json!({
        "type": "audio_data",
        "chunk": base64::engine::general_purpose::STANDARD.encode(text.as_bytes()),
        "is_silence": is_silence,
        "seq": seq,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn full_session_over_the_wire() {
    let llm = ScriptedLlm::new(vec![LlmScript::Reply {
        chunks: vec!["Hi ", "there!"],
        delay: Duration::from_millis(3),
    }]);
    let (addr, state, _dir) = spawn_server(llm).await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        serde_json::json!({"type": "session_start", "language": "en", "user_id": "ws-user"}),
    )
    .await;

    let started = next_json(&mut ws).await;
    assert_eq!(started["type"], "session_started");
    assert_eq!(started["event_seq"], 1);
    let session_id = started["session_id"].as_str().unwrap().to_string();

    // Ping round-trips.
    send_json(&mut ws, serde_json::json!({"type": "ping", "ts": 42})).await;
    let pong = next_json(&mut ws).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["ts"], 42);

    // One spoken utterance.
    send_json(&mut ws, audio_message("Hello", false, 1)).await;
    send_json(&mut ws, audio_message("", true, 2)).await;

    let mut events = vec![started, pong];
    loop {
        let event = next_json(&mut ws).await;
        let done = event["type"] == "ai_response_complete";
        events.push(event);
        if done {
            break;
        }
    }

    // event_seq is strictly increasing with no gaps, all on our session.
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event["event_seq"], (i as u64) + 1, "gap at {event}");
        assert_eq!(event["session_id"].as_str().unwrap(), session_id);
    }

    // The turn happened: transcription + chunks + completion.
    assert!(events
        .iter()
        .any(|e| e["type"] == "transcription" && e["is_final"] == true && e["text"] == "Hello"));
    assert!(events.iter().any(|e| e["type"] == "llm_response_chunk"));
    assert!(events.iter().any(|e| e["type"] == "streaming_audio_chunk"));
    let complete = events.last().unwrap();
    assert_eq!(complete["interrupted"], false);
    assert_eq!(complete["text"], "Hi there!");

    // Hang up.
    send_json(&mut ws, serde_json::json!({"type": "session_end"})).await;
    let ended = next_json(&mut ws).await;
    assert_eq!(ended["type"], "session_ended");
    assert_eq!(ended["reason"], "hangup");

    // The session made it into history.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let history = state.history.get_history("ws-user", 10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].turns, 1);
    assert!(history[0].session.ended_at.is_some());
}

#[tokio::test]
async fn malformed_messages_get_recoverable_protocol_errors() {
    let llm = ScriptedLlm::new(vec![]);
    let (addr, _state, _dir) = spawn_server(llm).await;
    let mut ws = connect(addr).await;

    send_json(&mut ws, serde_json::json!({"type": "session_start"})).await;
    let started = next_json(&mut ws).await;
    assert_eq!(started["type"], "session_started");

    // Unknown type.
    send_json(&mut ws, serde_json::json!({"type": "warp_drive"})).await;
    let error = next_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["kind"], "protocol");
    assert_eq!(error["recoverable"], true);

    // Bad base64.
    send_json(
        &mut ws,
        serde_json::json!({"type": "audio_data", "chunk": "not base64!!!", "is_silence": false, "seq": 1}),
    )
    .await;
    let error = next_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["kind"], "protocol");

    // The session survives both.
    send_json(&mut ws, serde_json::json!({"type": "ping", "ts": 7})).await;
    let pong = next_json(&mut ws).await;
    assert_eq!(pong["type"], "pong");
}

#[tokio::test]
async fn sessions_are_isolated() {
    let llm = ScriptedLlm::new(vec![]);
    let (addr, _state, _dir) = spawn_server(llm).await;

    let mut ws_a = connect(addr).await;
    let mut ws_b = connect(addr).await;
    send_json(
        &mut ws_a,
        serde_json::json!({"type": "session_start", "user_id": "alice"}),
    )
    .await;
    send_json(
        &mut ws_b,
        serde_json::json!({"type": "session_start", "user_id": "bob"}),
    )
    .await;

    let a_started = next_json(&mut ws_a).await;
    let b_started = next_json(&mut ws_b).await;
    let a_id = a_started["session_id"].as_str().unwrap().to_string();
    let b_id = b_started["session_id"].as_str().unwrap().to_string();
    assert_ne!(a_id, b_id);

    // Drive a turn on A; B stays silent.
    send_json(&mut ws_a, audio_message("Hello from alice", false, 1)).await;
    send_json(&mut ws_a, audio_message("", true, 2)).await;
    loop {
        let event = next_json(&mut ws_a).await;
        assert_eq!(event["session_id"].as_str().unwrap(), a_id);
        if event["type"] == "ai_response_complete" {
            break;
        }
    }

    // B has received nothing beyond its own session_started.
    send_json(&mut ws_b, serde_json::json!({"type": "ping", "ts": 1})).await;
    let b_next = next_json(&mut ws_b).await;
    assert_eq!(b_next["type"], "pong");
    assert_eq!(b_next["session_id"].as_str().unwrap(), b_id);
}

#[tokio::test]
async fn rest_surface_reports_health_and_serves_history() {
    use axum::extract::{Path, State};

    let llm = ScriptedLlm::new(vec![]);
    let (addr, state, _dir) = spawn_server(llm).await;

    // Run a quick session so history has content.
    let mut ws = connect(addr).await;
    send_json(
        &mut ws,
        serde_json::json!({"type": "session_start", "user_id": "rest-user"}),
    )
    .await;
    let _ = next_json(&mut ws).await;
    send_json(&mut ws, audio_message("remember the whales", false, 1)).await;
    send_json(&mut ws, audio_message("", true, 2)).await;
    loop {
        if next_json(&mut ws).await["type"] == "ai_response_complete" {
            break;
        }
    }
    send_json(&mut ws, serde_json::json!({"type": "session_end"})).await;
    let _ = next_json(&mut ws).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Health.
    let health = vx_gateway::api::admin::health(State(state.clone())).await;
    assert_eq!(health.0["status"], "ok");
    assert_eq!(health.0["history"]["turns"], 1);

    // History + search + turn fetch.
    let history = vx_gateway::api::history::get_history(
        State(state.clone()),
        Path("rest-user".to_string()),
        axum::extract::Query(vx_gateway::api::history::HistoryQuery { limit: 10 }),
    )
    .await;
    assert_eq!(history.0["sessions"].as_array().unwrap().len(), 1);

    let search = vx_gateway::api::history::search(
        State(state.clone()),
        axum::Json(vx_gateway::api::history::SearchRequest {
            user_id: "rest-user".into(),
            query: "whales".into(),
        }),
    )
    .await;
    let turns = search.0["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 1);
    let turn_id = turns[0]["turn_id"].as_str().unwrap().to_string();

    let turn = vx_gateway::api::history::get_call(State(state.clone()), Path(turn_id))
        .await
        .expect("turn exists");
    assert_eq!(turn.0.user_text, "remember the whales");

    // Administrative interrupt with no active turn.
    let missing = vx_gateway::api::admin::interrupt_session(
        State(state.clone()),
        Path("nope".to_string()),
    )
    .await;
    assert!(missing.is_err());
}
