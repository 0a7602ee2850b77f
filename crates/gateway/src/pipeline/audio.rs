//! Per-session audio buffering and utterance-boundary tracking.
//!
//! The client's `is_silence` hint is authoritative; there is no
//! server-side signal processing. The buffer accumulates chunk bytes,
//! tracks the last voice/silence instants, and computes the deadline at
//! which the trailing silence window closes the utterance.

use std::time::{Duration, Instant};

/// One complete utterance handed to the turn pipeline.
#[derive(Debug)]
pub struct Utterance {
    pub audio: Vec<u8>,
    /// Wall-clock span from first to last voiced chunk.
    pub voiced_ms: u64,
}

/// Rolling buffer of inbound audio, cleared after each utterance.
pub struct AudioBuffer {
    bytes: Vec<u8>,
    first_voice_at: Option<Instant>,
    last_voice_at: Option<Instant>,
    last_silence_at: Option<Instant>,
}

impl AudioBuffer {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            first_voice_at: None,
            last_voice_at: None,
            last_silence_at: None,
        }
    }

    pub fn push(&mut self, chunk: &[u8], is_silence: bool, now: Instant) {
        self.bytes.extend_from_slice(chunk);
        if is_silence {
            self.last_silence_at = Some(now);
        } else {
            if self.first_voice_at.is_none() {
                self.first_voice_at = Some(now);
            }
            self.last_voice_at = Some(now);
        }
    }

    /// Whether any voiced chunk has arrived since the last utterance.
    pub fn has_voice(&self) -> bool {
        self.first_voice_at.is_some()
    }

    /// When the silence window would close the current utterance.
    ///
    /// `None` until voice has been heard. The deadline rides the last
    /// voiced chunk, so it also fires when the client simply stops
    /// sending, since missing frames read as silence.
    pub fn utterance_deadline(&self, window: Duration) -> Option<Instant> {
        self.last_voice_at.map(|at| at + window)
    }

    /// Close the utterance: hand back its audio, clear the buffer.
    pub fn take_utterance(&mut self, now: Instant) -> Utterance {
        let voiced_ms = match (self.first_voice_at, self.last_voice_at) {
            (Some(first), Some(last)) => {
                last.saturating_duration_since(first).as_millis() as u64
            }
            _ => 0,
        };
        let _ = now;
        let audio = std::mem::take(&mut self.bytes);
        self.first_voice_at = None;
        self.last_voice_at = None;
        self.last_silence_at = None;
        Utterance { audio, voiced_ms }
    }

    /// Drop buffered audio without opening a turn (silence-only input).
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.first_voice_at = None;
        self.last_voice_at = None;
        self.last_silence_at = None;
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new()
    }
}
