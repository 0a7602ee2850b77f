//! Turn execution: the inner loop that takes one finished utterance
//! through STT → content policy → model routing → LLM stream → TTS
//! stream, emitting events as it goes.
//!
//! Cancellation is cooperative: the loop checks the turn's
//! [`CancelToken`] before every adapter call and at every stream
//! boundary, so a barge-in lands within one chunk of work. `ai_text` is
//! only ever appended after the matching `llm_response_chunk` event went
//! out, which keeps the persisted text the exact concatenation of what
//! the client saw.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use vx_adapters::router::{ModelRouter, RouteContext};
use vx_adapters::traits::{GenerateRequest, LlmAdapter, SttAdapter, TtsAdapter};
use vx_domain::call::{InterruptKind, SessionStatus, Turn};
use vx_domain::config::Config;
use vx_domain::error::Error;
use vx_domain::stream::{BoxStream, LlmEvent, SttEvent};
use vx_history::CallHistoryStore;

use crate::hub::protocol::ServerEvent;
use crate::hub::registry::SessionRegistry;
use crate::interrupt::{CancelToken, InterruptManager};

use super::audio::Utterance;
use super::policy::{ContentPolicy, OutFilter, PolicyFlags};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dependencies & inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a turn needs, cloned per session from the app state.
#[derive(Clone)]
pub struct TurnDeps {
    pub stt: Arc<dyn SttAdapter>,
    pub llm: Arc<dyn LlmAdapter>,
    pub tts: Arc<dyn TtsAdapter>,
    pub router: Arc<ModelRouter>,
    pub policy: Arc<dyn ContentPolicy>,
    pub history: Arc<CallHistoryStore>,
    pub interrupts: Arc<InterruptManager>,
    pub registry: Arc<SessionRegistry>,
    pub config: Arc<Config>,
    /// Outbound event channel; the hub's writer task owns ordering.
    pub events: mpsc::Sender<ServerEvent>,
}

/// Immutable session facts the turn works against.
#[derive(Clone)]
pub struct SessionMeta {
    pub session_id: String,
    pub user_id: String,
    pub language: String,
    pub kid_friendly: bool,
    pub model_hint: Option<String>,
}

/// How the turn ended, for the driver's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Interrupted,
    /// STT heard nothing; no turn was opened.
    Empty,
    Failed,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum ReplyEnd {
    Completed,
    Cancelled,
    Failed(Error),
}

enum SttOutcome {
    Text(String),
    Empty,
    Cancelled,
}

/// Run one turn to its terminal state. Spawned by the pipeline driver;
/// the driver keeps the handle so a superseding utterance can await
/// finalization before opening the next turn.
pub async fn run_turn(deps: TurnDeps, meta: SessionMeta, utterance: Utterance) -> TurnOutcome {
    let session_id = meta.session_id.clone();
    let turn_start = Instant::now();
    let flags = PolicyFlags {
        kid_friendly: meta.kid_friendly,
    };

    deps.interrupts.set_status(&session_id, SessionStatus::Thinking);
    let token = deps.interrupts.register_cancellable(&session_id);
    let mut turn = Turn::new(&session_id, &meta.user_id);

    tracing::debug!(
        session_id = %session_id,
        turn_id = %turn.turn_id,
        audio_bytes = utterance.audio.len(),
        voiced_ms = utterance.voiced_ms,
        "turn started"
    );

    // ── STT ─────────────────────────────────────────────────────────
    let stt_start = Instant::now();
    let user_text = match transcribe(&deps, &meta, utterance.audio, &token, flags).await {
        Ok(SttOutcome::Text(text)) => text,
        Ok(SttOutcome::Empty) => {
            emit(
                &deps.events,
                ServerEvent::Transcription {
                    text: String::new(),
                    is_final: true,
                },
            )
            .await;
            deps.interrupts.finish_turn(&session_id);
            deps.interrupts
                .set_status(&session_id, SessionStatus::SpeakingUser);
            return TurnOutcome::Empty;
        }
        Ok(SttOutcome::Cancelled) => {
            // Nothing transcribed yet; finalize without persisting.
            return finalize_interrupted(&deps, &meta, turn).await;
        }
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "transcription failed, discarding turn");
            emit_error(&deps.events, &e).await;
            deps.interrupts.finish_turn(&session_id);
            deps.interrupts
                .set_status(&session_id, SessionStatus::SpeakingUser);
            return TurnOutcome::Failed;
        }
    };
    turn.timings.stt_ms = stt_start.elapsed().as_millis() as u64;
    turn.user_text = user_text.clone();

    // ── Content policy (inbound) ────────────────────────────────────
    let decision = deps.policy.filter_in(&user_text, flags);
    emit(
        &deps.events,
        ServerEvent::Transcription {
            text: decision.text.clone(),
            is_final: true,
        },
    )
    .await;
    if !decision.allowed {
        turn.policy_redirected = true;
        tracing::info!(
            session_id = %session_id,
            reason = decision.reason.as_deref().unwrap_or("unspecified"),
            "content policy redirected the turn"
        );
    }

    // ── Model routing ───────────────────────────────────────────────
    let choice = deps.router.choose(&RouteContext {
        language: &meta.language,
        kid_friendly: meta.kid_friendly,
        prompt: &decision.text,
        model_hint: meta.model_hint.as_deref(),
        recent_llm_ms: deps.registry.recent_llm_ms(&session_id),
        active_sessions: deps.registry.len(),
        max_sessions: deps.config.server.max_sessions,
    });
    tracing::debug!(
        session_id = %session_id,
        model = %choice.model_id,
        reason = ?choice.reason,
        "model chosen"
    );

    // ── TTS stream setup ────────────────────────────────────────────
    let tts_start = Instant::now();
    let (text_tx, text_rx) = mpsc::channel::<String>(32);
    let text_stream: BoxStream<'static, String> = Box::pin(ReceiverStream::new(text_rx));
    let mut audio_on = true;
    let mut audio_stream: BoxStream<'static, vx_domain::error::Result<vx_domain::stream::AudioChunk>> = match deps
        .tts
        .synthesize(
            text_stream,
            &deps.config.adapters.tts.voice,
            &meta.language,
        )
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "TTS unavailable, degrading to text-only");
            turn.audio_unavailable = true;
            audio_on = false;
            Box::pin(futures_util::stream::empty())
        }
    };

    // ── Reply production (LLM ∥ TTS) ────────────────────────────────
    let llm_start = Instant::now();
    let mut out_filter = deps.policy.out_filter(flags);
    let mut text_tx = Some(text_tx);
    let mut chunk_index: u32 = 0;
    let mut first_audio_ms: Option<u64> = None;
    let send_budget = Duration::from_millis(deps.config.pipeline.cancellation_latency_ms);

    let end = if decision.allowed {
        stream_reply(
            &deps,
            &meta,
            &mut turn,
            &token,
            choice,
            &decision.text,
            &mut out_filter,
            &mut text_tx,
            &mut audio_stream,
            &mut audio_on,
            &mut chunk_index,
            &mut first_audio_ms,
            turn_start,
            send_budget,
        )
        .await
    } else {
        // Policy rejection: the reply is the canonical redirect, streamed
        // through the same event machinery so clients see no difference.
        let reply = deps.policy.redirect_reply().to_string();
        emit(
            &deps.events,
            ServerEvent::LlmResponseChunk {
                content: reply.clone(),
                is_final: false,
            },
        )
        .await;
        deps.interrupts
            .set_status(&session_id, SessionStatus::SpeakingAi);
        turn.ai_text.push_str(&reply);
        if let Some(tx) = &text_tx {
            let _ = tx.send_timeout(reply, send_budget).await;
        }
        emit(
            &deps.events,
            ServerEvent::LlmResponseChunk {
                content: String::new(),
                is_final: true,
            },
        )
        .await;
        ReplyEnd::Completed
    };
    turn.timings.llm_ms = llm_start.elapsed().as_millis() as u64;
    deps.registry.note_llm_ms(&session_id, turn.timings.llm_ms);

    // ── Drain remaining audio ───────────────────────────────────────
    drop(text_tx.take());
    let end = match end {
        ReplyEnd::Completed => {
            drain_audio(
                &deps,
                &token,
                &mut audio_stream,
                &mut audio_on,
                &mut chunk_index,
                &mut first_audio_ms,
                &mut turn,
                turn_start,
            )
            .await
        }
        other => other,
    };
    if chunk_index > 0 {
        emit(
            &deps.events,
            ServerEvent::StreamingAudioChunk {
                chunk_index,
                audio: String::new(),
                is_final: true,
            },
        )
        .await;
    }
    turn.timings.tts_ms = tts_start.elapsed().as_millis() as u64;
    turn.timings.first_audio_ms = first_audio_ms;
    turn.audio_chunks = chunk_index;

    // ── Finalize ────────────────────────────────────────────────────
    match end {
        ReplyEnd::Completed => {
            if !token.finish() {
                // A cancellation slipped in between the last checkpoint
                // and completion; it wins, and is reported exactly once.
                return finalize_interrupted(&deps, &meta, turn).await;
            }
            turn.finished_at = Some(Utc::now());
            emit(
                &deps.events,
                ServerEvent::AiResponseComplete {
                    turn_id: turn.turn_id.clone(),
                    text: turn.ai_text.clone(),
                    interrupted: false,
                    interrupt_kind: None,
                    audio_chunks: turn.audio_chunks,
                    audio_unavailable: turn.audio_unavailable,
                    timings: turn.timings,
                },
            )
            .await;
            tracing::info!(
                session_id = %meta.session_id,
                turn_id = %turn.turn_id,
                stt_ms = turn.timings.stt_ms,
                llm_ms = turn.timings.llm_ms,
                tts_ms = turn.timings.tts_ms,
                audio_chunks = turn.audio_chunks,
                "turn completed"
            );
            deps.history.append_turn(turn).await;
            deps.interrupts.finish_turn(&meta.session_id);
            TurnOutcome::Completed
        }
        ReplyEnd::Cancelled => finalize_interrupted(&deps, &meta, turn).await,
        ReplyEnd::Failed(e) => {
            tracing::warn!(session_id = %meta.session_id, error = %e, "turn failed");
            emit_error(&deps.events, &e).await;
            deps.interrupts.finish_turn(&meta.session_id);
            deps.interrupts
                .set_status(&meta.session_id, SessionStatus::SpeakingUser);
            TurnOutcome::Failed
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STT phase
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn transcribe(
    deps: &TurnDeps,
    meta: &SessionMeta,
    audio: Vec<u8>,
    token: &CancelToken,
    flags: PolicyFlags,
) -> vx_domain::error::Result<SttOutcome> {
    if token.is_cancelled() {
        return Ok(SttOutcome::Cancelled);
    }
    let mut stream = deps.stt.transcribe(audio, &meta.language).await?;

    while let Some(event) = stream.next().await {
        if token.is_cancelled() {
            return Ok(SttOutcome::Cancelled);
        }
        match event? {
            SttEvent::Partial { text } => {
                // Partials go to the wire policy-filtered, same as finals.
                let shown = deps.policy.filter_in(&text, flags).text;
                emit(
                    &deps.events,
                    ServerEvent::Transcription {
                        text: shown,
                        is_final: false,
                    },
                )
                .await;
            }
            SttEvent::Final { text } => {
                return Ok(if text.trim().is_empty() {
                    SttOutcome::Empty
                } else {
                    SttOutcome::Text(text)
                });
            }
        }
    }
    // Stream ended without a final marker.
    Ok(SttOutcome::Empty)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM ∥ TTS phase
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drive the LLM stream while concurrently pumping produced audio, so
/// the first clause is playing before the model finishes writing.
/// One fallback retry is allowed, and only before any chunk was emitted
/// (emitted text cannot be un-said).
#[allow(clippy::too_many_arguments)]
async fn stream_reply(
    deps: &TurnDeps,
    meta: &SessionMeta,
    turn: &mut Turn,
    token: &CancelToken,
    mut choice: vx_domain::call::ModelChoice,
    prompt: &str,
    out_filter: &mut Box<dyn OutFilter>,
    text_tx: &mut Option<mpsc::Sender<String>>,
    audio_stream: &mut BoxStream<'static, vx_domain::error::Result<vx_domain::stream::AudioChunk>>,
    audio_on: &mut bool,
    chunk_index: &mut u32,
    first_audio_ms: &mut Option<u64>,
    turn_start: Instant,
    send_budget: Duration,
) -> ReplyEnd {
    let mut attempt = 0u32;

    'attempts: loop {
        if token.is_cancelled() {
            return ReplyEnd::Cancelled;
        }
        let req = GenerateRequest {
            prompt: prompt.to_owned(),
            language: meta.language.clone(),
            choice: choice.clone(),
        };
        let mut llm_stream = match deps.llm.generate(req).await {
            Ok(stream) => stream,
            Err(e) => {
                if attempt == 0 {
                    tracing::warn!(
                        session_id = %meta.session_id,
                        model = %choice.model_id,
                        error = %e,
                        "LLM call failed, retrying with fallback model"
                    );
                    attempt = 1;
                    choice = deps.router.fallback(&choice);
                    continue 'attempts;
                }
                return ReplyEnd::Failed(e);
            }
        };

        loop {
            if token.is_cancelled() {
                return ReplyEnd::Cancelled;
            }
            tokio::select! {
                item = llm_stream.next() => match item {
                    Some(Ok(LlmEvent::Token { text })) => {
                        let filtered = out_filter.filter_chunk(&text);
                        if !filtered.is_empty() {
                            emit(
                                &deps.events,
                                ServerEvent::LlmResponseChunk {
                                    content: filtered.clone(),
                                    is_final: false,
                                },
                            )
                            .await;
                            if turn.ai_text.is_empty() {
                                deps.interrupts
                                    .set_status(&meta.session_id, SessionStatus::SpeakingAi);
                            }
                            turn.ai_text.push_str(&filtered);
                            if let Some(tx) = text_tx {
                                // Bounded wait: a stalled synthesizer must
                                // not hold up cancellation checks.
                                if tx.send_timeout(filtered, send_budget).await.is_err()
                                    && *audio_on
                                {
                                    tracing::debug!("TTS input backlogged, skipping clause text");
                                }
                            }
                        }
                    }
                    Some(Ok(LlmEvent::Done)) | None => break,
                    Some(Err(e)) => {
                        if turn.ai_text.is_empty() && attempt == 0 {
                            tracing::warn!(
                                session_id = %meta.session_id,
                                model = %choice.model_id,
                                error = %e,
                                "LLM stream failed before first chunk, retrying with fallback model"
                            );
                            attempt = 1;
                            choice = deps.router.fallback(&choice);
                            *out_filter = deps.policy.out_filter(PolicyFlags {
                                kid_friendly: meta.kid_friendly,
                            });
                            continue 'attempts;
                        }
                        return ReplyEnd::Failed(e);
                    }
                },
                item = audio_stream.next(), if *audio_on => {
                    pump_audio(deps, item, turn, audio_on, chunk_index, first_audio_ms, turn_start)
                        .await;
                }
            }
        }

        // LLM stream finished cleanly: release held-back text and close.
        let tail = out_filter.flush();
        if !tail.is_empty() {
            emit(
                &deps.events,
                ServerEvent::LlmResponseChunk {
                    content: tail.clone(),
                    is_final: false,
                },
            )
            .await;
            if turn.ai_text.is_empty() {
                deps.interrupts
                    .set_status(&meta.session_id, SessionStatus::SpeakingAi);
            }
            turn.ai_text.push_str(&tail);
            if let Some(tx) = text_tx {
                let _ = tx.send_timeout(tail, send_budget).await;
            }
        }
        emit(
            &deps.events,
            ServerEvent::LlmResponseChunk {
                content: String::new(),
                is_final: true,
            },
        )
        .await;
        return ReplyEnd::Completed;
    }
}

/// After the LLM is done and the text channel closed, consume whatever
/// the synthesizer still has in flight.
#[allow(clippy::too_many_arguments)]
async fn drain_audio(
    deps: &TurnDeps,
    token: &CancelToken,
    audio_stream: &mut BoxStream<'static, vx_domain::error::Result<vx_domain::stream::AudioChunk>>,
    audio_on: &mut bool,
    chunk_index: &mut u32,
    first_audio_ms: &mut Option<u64>,
    turn: &mut Turn,
    turn_start: Instant,
) -> ReplyEnd {
    while *audio_on {
        if token.is_cancelled() {
            return ReplyEnd::Cancelled;
        }
        let item = audio_stream.next().await;
        let was_end = item.is_none();
        pump_audio(deps, item, turn, audio_on, chunk_index, first_audio_ms, turn_start).await;
        if was_end {
            break;
        }
    }
    ReplyEnd::Completed
}

async fn pump_audio(
    deps: &TurnDeps,
    item: Option<vx_domain::error::Result<vx_domain::stream::AudioChunk>>,
    turn: &mut Turn,
    audio_on: &mut bool,
    chunk_index: &mut u32,
    first_audio_ms: &mut Option<u64>,
    turn_start: Instant,
) {
    match item {
        Some(Ok(chunk)) => {
            *chunk_index += 1;
            if first_audio_ms.is_none() {
                let ms = turn_start.elapsed().as_millis() as u64;
                *first_audio_ms = Some(ms);
                if ms > deps.config.pipeline.first_audio_target_ms {
                    tracing::warn!(
                        session_id = %turn.session_id,
                        first_audio_ms = ms,
                        target_ms = deps.config.pipeline.first_audio_target_ms,
                        "first audio chunk missed its target"
                    );
                }
            }
            emit(
                &deps.events,
                ServerEvent::StreamingAudioChunk {
                    chunk_index: *chunk_index,
                    audio: base64::engine::general_purpose::STANDARD.encode(&chunk.bytes),
                    is_final: false,
                },
            )
            .await;
        }
        Some(Err(e)) => {
            tracing::warn!(
                session_id = %turn.session_id,
                error = %e,
                "TTS stream failed, continuing text-only"
            );
            *audio_on = false;
            if *chunk_index == 0 {
                turn.audio_unavailable = true;
            }
        }
        None => {
            *audio_on = false;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Finalization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Close an interrupted turn: confirm the interrupt, emit the completion
/// with the emitted-prefix text, persist (when there is a transcription
/// to anchor it), and hand the floor back to the user.
async fn finalize_interrupted(deps: &TurnDeps, meta: &SessionMeta, mut turn: Turn) -> TurnOutcome {
    let kind = deps
        .interrupts
        .take_pending_kind(&meta.session_id)
        .unwrap_or(InterruptKind::Manual);
    turn.interrupted = true;
    turn.interrupt_kind = Some(kind);
    turn.finished_at = Some(Utc::now());

    if kind != InterruptKind::System {
        emit(&deps.events, ServerEvent::InterruptConfirmed { kind }).await;
    }
    emit(
        &deps.events,
        ServerEvent::AiResponseComplete {
            turn_id: turn.turn_id.clone(),
            text: turn.ai_text.clone(),
            interrupted: true,
            interrupt_kind: Some(kind),
            audio_chunks: turn.audio_chunks,
            audio_unavailable: turn.audio_unavailable,
            timings: turn.timings,
        },
    )
    .await;

    tracing::info!(
        session_id = %meta.session_id,
        turn_id = %turn.turn_id,
        kind = ?kind,
        ai_chars = turn.ai_text.len(),
        "turn interrupted"
    );

    if !turn.user_text.is_empty() {
        deps.history.append_turn(turn).await;
    }
    deps.interrupts.finish_turn(&meta.session_id);
    let next_status = if kind == InterruptKind::System {
        SessionStatus::Ending
    } else {
        SessionStatus::SpeakingUser
    };
    deps.interrupts.set_status(&meta.session_id, next_status);
    TurnOutcome::Interrupted
}

async fn emit(events: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    let _ = events.send(event).await;
}

async fn emit_error(events: &mpsc::Sender<ServerEvent>, error: &Error) {
    emit(
        events,
        ServerEvent::Error {
            kind: error.kind().to_owned(),
            message: error.to_string(),
            recoverable: error.recoverable(),
        },
    )
    .await;
}
