//! The WebSocket front door at `/phone/stream`.
//!
//! Flow:
//! 1. Client connects and sends `session_start` (10 s deadline).
//! 2. The hub mints a session, registers it, and answers `session_started`.
//! 3. One reader loop (this task) and one writer task per socket. The
//!    writer owns `event_seq` assignment, so outbound order is total.
//! 4. Inbound audio flows into the pipeline over a bounded channel; when
//!    it fills, the `await` here pauses the reader, which flow-controls
//!    the client instead of dropping audio.

pub mod protocol;
pub mod registry;

use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use base64::Engine as _;
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use vx_domain::call::{InterruptKind, Session, SessionStatus};

use crate::pipeline::turn::SessionMeta;
use crate::pipeline::{PipelineEngine, PipelineMsg};
use crate::state::AppState;

use protocol::{ClientMessage, Envelope, ServerEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /phone/stream: upgrade to WebSocket.
pub async fn phone_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    if state.registry.len() >= state.config.server.max_sessions {
        tracing::warn!(
            active = state.registry.len(),
            max = state.config.server.max_sessions,
            "rejecting connection at session capacity"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "session capacity reached").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sink, mut ws_stream) = socket.split();

    // 1. Wait for session_start.
    let Some(start) = wait_for_session_start(&mut ws_stream).await else {
        tracing::warn!("client disconnected before sending session_start");
        return;
    };

    let kid_friendly = start
        .kid_friendly
        .unwrap_or(state.config.pipeline.kid_friendly_default);
    let user_id = start.user_id.unwrap_or_else(|| "anonymous".into());
    let mut session = Session::new(&user_id, &start.language, kid_friendly);
    session.model_hint = start.model_hint.clone();
    session.status = SessionStatus::Connected;
    let session_id = session.session_id.clone();

    // 2. Writer task with a bounded outbound channel.
    let (outbound_tx, outbound_rx) = mpsc::channel(state.config.pipeline.outbound_queue_size);
    let writer = tokio::spawn(writer_task(
        ws_sink,
        outbound_rx,
        session_id.clone(),
        Duration::from_millis(state.config.pipeline.send_timeout_ms),
    ));

    // 3. Register everywhere that indexes by session_id.
    state.interrupts.create(&session_id);
    state.interrupts.set_status(&session_id, SessionStatus::Connected);
    state.registry.register(session.clone(), outbound_tx.clone());
    state.history.begin_session(session).await;

    let _ = outbound_tx
        .send(ServerEvent::SessionStarted {
            session_id: session_id.clone(),
        })
        .await;

    tracing::info!(
        session_id = %session_id,
        user_id = %user_id,
        language = %start.language,
        kid_friendly,
        "session connected"
    );

    // 4. Pipeline driver with a bounded inbound channel.
    let (pipe_tx, pipe_rx) = mpsc::channel(state.config.pipeline.inbound_queue_size);
    let meta = SessionMeta {
        session_id: session_id.clone(),
        user_id: user_id.clone(),
        language: start.language.clone(),
        kid_friendly,
        model_hint: start.model_hint,
    };
    let driver = tokio::spawn(
        PipelineEngine::new(state.turn_deps(outbound_tx.clone()), meta).run(pipe_rx),
    );

    // 5. Reader loop.
    let mut reason = "transport";
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => {
                    if !dispatch(msg, &state, &session_id, &pipe_tx, &outbound_tx).await {
                        reason = "hangup";
                        break;
                    }
                }
                Err(e) => {
                    let _ = outbound_tx
                        .send(ServerEvent::Error {
                            kind: "protocol".into(),
                            message: format!("unparseable message: {e}"),
                            recoverable: true,
                        })
                        .await;
                }
            },
            Message::Binary(_) => {
                let _ = outbound_tx
                    .send(ServerEvent::Error {
                        kind: "protocol".into(),
                        message: "binary frames are not supported; send JSON text".into(),
                        recoverable: true,
                    })
                    .await;
            }
            Message::Close(_) => {
                reason = "client_closed";
                break;
            }
            // axum answers WS-level ping/pong on its own.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // 6. Orderly teardown: let the driver drain queued audio and
    //    finalize any in-flight turn, then close out the session.
    state.interrupts.set_status(&session_id, SessionStatus::Ending);
    if reason == "hangup" {
        let _ = pipe_tx.send(PipelineMsg::Hangup).await;
    }
    drop(pipe_tx);
    let _ = driver.await;

    let _ = outbound_tx
        .send(ServerEvent::SessionEnded {
            reason: reason.into(),
        })
        .await;
    state.history.end_session(&session_id, Utc::now()).await;
    state.registry.remove(&session_id);
    state.interrupts.remove(&session_id);
    drop(outbound_tx);
    let _ = writer.await;

    tracing::info!(session_id = %session_id, reason, "session disconnected");
}

/// Route one inbound message. Returns false when the session should end.
async fn dispatch(
    msg: ClientMessage,
    state: &AppState,
    session_id: &str,
    pipe_tx: &mpsc::Sender<PipelineMsg>,
    outbound_tx: &mpsc::Sender<ServerEvent>,
) -> bool {
    match msg {
        ClientMessage::AudioData {
            chunk,
            is_silence,
            seq,
        } => match base64::engine::general_purpose::STANDARD.decode(chunk.as_bytes()) {
            Ok(bytes) => {
                // Bounded send: pauses this reader when the pipeline is
                // behind, which flow-controls the socket.
                if pipe_tx
                    .send(PipelineMsg::Audio {
                        bytes,
                        is_silence,
                        seq,
                    })
                    .await
                    .is_err()
                {
                    return false;
                }
            }
            Err(_) => {
                let _ = outbound_tx
                    .send(ServerEvent::Error {
                        kind: "protocol".into(),
                        message: "audio_data.chunk is not valid base64".into(),
                        recoverable: true,
                    })
                    .await;
            }
        },
        ClientMessage::UserStopSpeaking => {
            if pipe_tx.send(PipelineMsg::StopSpeaking).await.is_err() {
                return false;
            }
        }
        ClientMessage::Interrupt => {
            // Straight to the interrupt manager; a manual interrupt must
            // not queue behind buffered audio.
            let outcome = state.interrupts.trigger_interrupt(
                session_id,
                InterruptKind::Manual,
                Instant::now(),
            );
            tracing::debug!(session_id = %session_id, ?outcome, "manual interrupt requested");
        }
        ClientMessage::Ping { ts } => {
            let _ = outbound_tx.send(ServerEvent::Pong { ts }).await;
        }
        ClientMessage::SessionEnd => return false,
        ClientMessage::SessionStart { .. } => {
            let _ = outbound_tx
                .send(ServerEvent::Error {
                    kind: "protocol".into(),
                    message: "session already started".into(),
                    recoverable: true,
                })
                .await;
        }
    }
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handshake
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StartData {
    language: String,
    kid_friendly: Option<bool>,
    model_hint: Option<String>,
    user_id: Option<String>,
}

async fn wait_for_session_start(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<StartData> {
    // Give the client 10 seconds to open the session.
    let deadline = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ClientMessage::SessionStart {
                    language,
                    kid_friendly,
                    model_hint,
                    user_id,
                }) = serde_json::from_str::<ClientMessage>(&text)
                {
                    return Some(StartData {
                        language,
                        kid_friendly,
                        model_hint,
                        user_id,
                    });
                }
            }
        }
        None
    })
    .await;

    deadline.unwrap_or(None)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Writer task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Single writer per socket: assigns `event_seq`, serializes, and sends.
/// A send stalled past `send_timeout` marks the session overloaded and
/// closes it rather than buffering without bound.
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerEvent>,
    session_id: String,
    send_timeout: Duration,
) {
    let mut event_seq: u64 = 0;

    while let Some(event) = rx.recv().await {
        event_seq += 1;
        let envelope = Envelope {
            session_id: session_id.clone(),
            event_seq,
            event,
        };
        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "failed to serialize event");
                continue;
            }
        };

        match tokio::time::timeout(send_timeout, sink.send(Message::Text(json))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                tracing::debug!(session_id = %session_id, "socket closed mid-send");
                break;
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %session_id,
                    stalled_ms = send_timeout.as_millis() as u64,
                    "outbound send stalled, closing session as overloaded"
                );
                let close = sink.send(Message::Close(Some(CloseFrame {
                    code: 1013,
                    reason: "overloaded".into(),
                })));
                let _ = tokio::time::timeout(Duration::from_millis(250), close).await;
                break;
            }
        }
    }
}
