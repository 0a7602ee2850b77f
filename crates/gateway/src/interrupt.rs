//! Per-session interrupt arbitration: who is speaking, which turn is
//! cancellable, and when the auto-interrupt fires.
//!
//! The manager owns a process-wide map keyed by session id; each entry is
//! guarded by its own lock so sessions never contend with each other.
//! Turn tasks register a [`CancelToken`] here and check it between
//! adapter boundaries; the hub and the audio path drive the speaking
//! state. All timing flows in as explicit [`Instant`]s so the arbitration
//! logic is deterministic under test.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;

use vx_domain::call::{InterruptKind, InterruptRecord, SessionStatus};
use vx_domain::config::PipelineConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CancelToken
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const DONE: u8 = 2;

/// A three-state cancellation token checked by the turn loop.
///
/// `cancel()` and `finish()` race through compare-and-swap, so a
/// cancellation arriving as the turn completes naturally resolves to
/// exactly one outcome: whichever transition wins.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<AtomicU8>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ACTIVE)),
        }
    }

    /// Request cancellation. Returns true if this call won the transition;
    /// false if the token was already cancelled or already done.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(ACTIVE, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark the turn naturally complete. Returns false if a cancellation
    /// got there first; the caller must finalize as interrupted.
    pub fn finish(&self) -> bool {
        self.state
            .compare_exchange(ACTIVE, DONE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            || self.state.load(Ordering::Acquire) == DONE
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// InterruptManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a `trigger_interrupt` call resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The token was cancelled by this call.
    Fired(InterruptKind),
    /// A previous interrupt already owns the turn; idempotent no-op.
    AlreadyInterrupted,
    /// The turn completed before the cancellation landed.
    AlreadyCompleted,
    /// No turn is in flight for this session.
    NoActiveTurn,
}

struct SessionEntry {
    status: SessionStatus,
    /// Start of the current contiguous voice run; silence clears it.
    voice_onset: Option<Instant>,
    token: Option<CancelToken>,
    /// At most one auto-interrupt per turn.
    auto_fired: bool,
    /// The kind that cancelled the current token, read at finalization.
    pending_kind: Option<InterruptKind>,
    last_record: Option<InterruptRecord>,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            status: SessionStatus::Dialing,
            voice_onset: None,
            token: None,
            auto_fired: false,
            pending_kind: None,
            last_record: None,
        }
    }

    fn speech_ms(&self, now: Instant) -> u64 {
        self.voice_onset
            .map(|onset| now.saturating_duration_since(onset).as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Process-wide interrupt arbitration, keyed by session id.
pub struct InterruptManager {
    entries: Mutex<HashMap<String, Arc<Mutex<SessionEntry>>>>,
    auto_interrupt_ms: u64,
    min_user_speech_ms: u64,
}

impl InterruptManager {
    pub fn new(cfg: &PipelineConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            auto_interrupt_ms: cfg.auto_interrupt_ms,
            min_user_speech_ms: cfg.min_user_speech_duration_ms,
        }
    }

    // ── Session lifecycle ───────────────────────────────────────────

    pub fn create(&self, session_id: &str) {
        self.entries
            .lock()
            .insert(session_id.to_owned(), Arc::new(Mutex::new(SessionEntry::new())));
    }

    pub fn remove(&self, session_id: &str) {
        self.entries.lock().remove(session_id);
    }

    fn entry(&self, session_id: &str) -> Option<Arc<Mutex<SessionEntry>>> {
        self.entries.lock().get(session_id).cloned()
    }

    // ── Status ──────────────────────────────────────────────────────

    pub fn set_status(&self, session_id: &str, status: SessionStatus) {
        if let Some(entry) = self.entry(session_id) {
            entry.lock().status = status;
        }
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.entry(session_id).map(|e| e.lock().status)
    }

    // ── Turn registration ───────────────────────────────────────────

    /// Register a fresh token for the session's new turn. Resets the
    /// one-auto-interrupt-per-turn latch.
    pub fn register_cancellable(&self, session_id: &str) -> CancelToken {
        let token = CancelToken::new();
        if let Some(entry) = self.entry(session_id) {
            let mut entry = entry.lock();
            entry.token = Some(token.clone());
            entry.auto_fired = false;
            entry.pending_kind = None;
        }
        token
    }

    /// Clear the turn's token after finalization. Idempotent.
    pub fn finish_turn(&self, session_id: &str) {
        if let Some(entry) = self.entry(session_id) {
            let mut entry = entry.lock();
            if let Some(token) = entry.token.take() {
                token.finish();
            }
        }
    }

    /// Whether a turn is currently registered (and not yet finalized).
    pub fn turn_in_flight(&self, session_id: &str) -> bool {
        self.entry(session_id)
            .map(|e| e.lock().token.is_some())
            .unwrap_or(false)
    }

    // ── Speaking state ──────────────────────────────────────────────

    /// Record a voiced chunk at `now`. Drives the status transition out
    /// of `speaking_ai` once the AI has finished, and evaluates the
    /// auto-interrupt rule while a turn is still streaming. Returns the
    /// record when this call fired the auto-interrupt.
    pub fn start_user_speaking(&self, session_id: &str, now: Instant) -> Option<InterruptRecord> {
        let entry = self.entry(session_id)?;
        let mut entry = entry.lock();

        if entry.voice_onset.is_none() {
            entry.voice_onset = Some(now);
        }
        let speech_ms = entry.speech_ms(now);
        let speaking = speech_ms >= self.min_user_speech_ms;

        match entry.status {
            SessionStatus::Connected if speaking => {
                entry.status = SessionStatus::SpeakingUser;
                None
            }
            SessionStatus::SpeakingAi => {
                if entry.token.is_none() {
                    // The reply already finished; the user taking over is
                    // a plain status transition, not an interrupt.
                    if speaking {
                        entry.status = SessionStatus::SpeakingUser;
                    }
                    return None;
                }
                if entry.auto_fired
                    || speech_ms < self.auto_interrupt_ms
                    || speech_ms < self.min_user_speech_ms
                {
                    return None;
                }
                let token = entry.token.clone()?;
                if !token.cancel() {
                    return None;
                }
                entry.auto_fired = true;
                entry.pending_kind = Some(InterruptKind::Auto);
                let record = InterruptRecord {
                    session_id: session_id.to_owned(),
                    kind: InterruptKind::Auto,
                    triggered_at: Utc::now(),
                    user_speech_duration_ms: speech_ms,
                };
                entry.last_record = Some(record.clone());
                Some(record)
            }
            _ => None,
        }
    }

    /// Record silence: the contiguous voice run is over.
    pub fn stop_user_speaking(&self, session_id: &str) {
        if let Some(entry) = self.entry(session_id) {
            entry.lock().voice_onset = None;
        }
    }

    pub fn is_user_speaking(&self, session_id: &str, now: Instant) -> bool {
        self.entry(session_id)
            .map(|e| e.lock().speech_ms(now) >= self.min_user_speech_ms)
            .unwrap_or(false)
    }

    pub fn speech_duration_ms(&self, session_id: &str, now: Instant) -> u64 {
        self.entry(session_id)
            .map(|e| e.lock().speech_ms(now))
            .unwrap_or(0)
    }

    // ── Interrupt ───────────────────────────────────────────────────

    /// Cancel the session's in-flight turn. Totally ordered with respect
    /// to the entry's state; a second interrupt during the same turn is a
    /// no-op, and a cancel racing natural completion reports
    /// `AlreadyCompleted` instead of firing twice.
    pub fn trigger_interrupt(
        &self,
        session_id: &str,
        kind: InterruptKind,
        now: Instant,
    ) -> TriggerOutcome {
        let Some(entry) = self.entry(session_id) else {
            return TriggerOutcome::NoActiveTurn;
        };
        let mut entry = entry.lock();
        let Some(token) = entry.token.clone() else {
            return TriggerOutcome::NoActiveTurn;
        };

        if token.cancel() {
            if kind == InterruptKind::Auto {
                entry.auto_fired = true;
            }
            entry.pending_kind = Some(kind);
            let record = InterruptRecord {
                session_id: session_id.to_owned(),
                kind,
                triggered_at: Utc::now(),
                user_speech_duration_ms: entry.speech_ms(now),
            };
            entry.last_record = Some(record);
            TriggerOutcome::Fired(kind)
        } else if token.is_cancelled() {
            TriggerOutcome::AlreadyInterrupted
        } else {
            TriggerOutcome::AlreadyCompleted
        }
    }

    /// The kind that cancelled the current turn, consumed at finalization.
    pub fn take_pending_kind(&self, session_id: &str) -> Option<InterruptKind> {
        self.entry(session_id)?.lock().pending_kind.take()
    }

    pub fn last_record(&self, session_id: &str) -> Option<InterruptRecord> {
        self.entry(session_id)?.lock().last_record.clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
