//! The per-session pipeline driver.
//!
//! One task per session: ingests audio off the bounded inbound channel,
//! tracks the utterance boundary, and spawns a turn task when the
//! trailing silence window closes (or the client short-circuits it).
//! A new utterance supersedes any turn still in flight: the old turn is
//! cancelled and awaited before the next one opens, so a session never
//! has two turns running.

pub mod audio;
pub mod policy;
pub mod turn;

use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use vx_domain::call::InterruptKind;

use crate::hub::protocol::ServerEvent;

use audio::AudioBuffer;
use turn::{run_turn, SessionMeta, TurnDeps, TurnOutcome};

/// Messages from the hub's reader loop into the driver.
#[derive(Debug)]
pub enum PipelineMsg {
    Audio {
        bytes: Vec<u8>,
        is_silence: bool,
        seq: u64,
    },
    /// `user_stop_speaking`: close the utterance without waiting out the
    /// silence window.
    StopSpeaking,
    /// `session_end`: user-initiated teardown.
    Hangup,
}

pub struct PipelineEngine {
    deps: TurnDeps,
    meta: SessionMeta,
    buffer: AudioBuffer,
    current_turn: Option<tokio::task::JoinHandle<TurnOutcome>>,
    last_seq: Option<u64>,
    teardown_kind: InterruptKind,
}

impl PipelineEngine {
    pub fn new(deps: TurnDeps, meta: SessionMeta) -> Self {
        Self {
            deps,
            meta,
            buffer: AudioBuffer::new(),
            current_turn: None,
            last_seq: None,
            teardown_kind: InterruptKind::System,
        }
    }

    /// Drive the session until hangup or channel close.
    pub async fn run(mut self, mut rx: mpsc::Receiver<PipelineMsg>) {
        let window = Duration::from_millis(self.deps.config.pipeline.end_of_utterance_ms);

        loop {
            let deadline = self.buffer.utterance_deadline(window);
            let sleep_target = tokio::time::Instant::from_std(
                deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600)),
            );

            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(PipelineMsg::Audio { bytes, is_silence, seq }) => {
                        self.ingest(bytes, is_silence, seq).await;
                    }
                    Some(PipelineMsg::StopSpeaking) => self.close_utterance().await,
                    Some(PipelineMsg::Hangup) => {
                        self.teardown_kind = InterruptKind::Manual;
                        break;
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(sleep_target), if deadline.is_some() => {
                    self.close_utterance().await;
                }
            }
        }

        self.teardown().await;
    }

    async fn ingest(&mut self, bytes: Vec<u8>, is_silence: bool, seq: u64) {
        let cfg = &self.deps.config.pipeline;
        if bytes.len() > cfg.max_chunk_bytes {
            tracing::warn!(
                session_id = %self.meta.session_id,
                bytes = bytes.len(),
                max = cfg.max_chunk_bytes,
                "oversized audio chunk rejected"
            );
            let _ = self
                .deps
                .events
                .send(ServerEvent::Error {
                    kind: "protocol".into(),
                    message: format!(
                        "audio chunk of {} bytes exceeds max_chunk_bytes ({})",
                        bytes.len(),
                        cfg.max_chunk_bytes
                    ),
                    recoverable: true,
                })
                .await;
            return;
        }

        if let Some(last) = self.last_seq {
            if seq > last + 1 {
                tracing::debug!(
                    session_id = %self.meta.session_id,
                    expected = last + 1,
                    got = seq,
                    "audio chunk sequence gap"
                );
            }
        }
        self.last_seq = Some(seq);

        let now = Instant::now();
        self.buffer.push(&bytes, is_silence, now);

        if is_silence {
            self.deps.interrupts.stop_user_speaking(&self.meta.session_id);
        } else if let Some(record) = self
            .deps
            .interrupts
            .start_user_speaking(&self.meta.session_id, now)
        {
            tracing::info!(
                session_id = %self.meta.session_id,
                speech_ms = record.user_speech_duration_ms,
                "auto-interrupt fired"
            );
        }
    }

    /// Close the current utterance and open a turn for it. A silence-only
    /// buffer is discarded without a turn.
    async fn close_utterance(&mut self) {
        if !self.buffer.has_voice() {
            self.buffer.clear();
            return;
        }
        let utterance = self.buffer.take_utterance(Instant::now());
        self.deps.interrupts.stop_user_speaking(&self.meta.session_id);

        // Supersede: cancel the in-flight turn and wait for it to
        // finalize before the new one opens.
        if let Some(handle) = self.current_turn.take() {
            if !handle.is_finished() {
                self.deps.interrupts.trigger_interrupt(
                    &self.meta.session_id,
                    InterruptKind::Auto,
                    Instant::now(),
                );
            }
            let _ = handle.await;
        }

        let deps = self.deps.clone();
        let meta = self.meta.clone();
        self.current_turn = Some(tokio::spawn(run_turn(deps, meta, utterance)));
    }

    /// Session teardown: finalize any in-flight turn as interrupted.
    async fn teardown(&mut self) {
        if let Some(handle) = self.current_turn.take() {
            if !handle.is_finished() {
                self.deps.interrupts.trigger_interrupt(
                    &self.meta.session_id,
                    self.teardown_kind,
                    Instant::now(),
                );
            }
            let _ = handle.await;
        }
    }
}
