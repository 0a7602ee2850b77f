//! Per-upstream health gate: capped concurrency plus a consecutive-failure
//! circuit breaker with exponential cooldown.
//!
//! Every adapter call runs `admit() → request → record_success/failure`.
//! While the circuit is open, `admit` returns a fast failure that the turn
//! loop routes down the same fallback path as any other adapter error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use vx_domain::config::CircuitConfig;
use vx_domain::error::{Error, Result};

/// Which upstream a gate guards; decides the error kind for fast failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Stt,
    Llm,
    Tts,
}

impl AdapterKind {
    pub fn name(self) -> &'static str {
        match self {
            AdapterKind::Stt => "stt",
            AdapterKind::Llm => "llm",
            AdapterKind::Tts => "tts",
        }
    }

    fn error(self, message: String) -> Error {
        match self {
            AdapterKind::Stt => Error::Stt(message),
            AdapterKind::Llm => Error::Llm(message),
            AdapterKind::Tts => Error::Tts(message),
        }
    }
}

struct GateState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
    /// Consecutive circuit opens; scales the cooldown.
    opens: u32,
}

/// Concurrency cap + circuit breaker for one upstream.
pub struct AdapterGate {
    kind: AdapterKind,
    limiter: Arc<Semaphore>,
    pool_size: usize,
    state: Mutex<GateState>,
    open_after: u32,
    cooldown: Duration,
    max_cooldown: Duration,
}

impl AdapterGate {
    pub fn new(kind: AdapterKind, pool_size: usize, circuit: &CircuitConfig) -> Self {
        Self {
            kind,
            limiter: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            state: Mutex::new(GateState {
                consecutive_failures: 0,
                open_until: None,
                opens: 0,
            }),
            open_after: circuit.open_after,
            cooldown: Duration::from_millis(circuit.cooldown_ms),
            max_cooldown: Duration::from_millis(circuit.max_cooldown_ms),
        }
    }

    pub fn kind(&self) -> AdapterKind {
        self.kind
    }

    /// Acquire a request slot, or fail fast while the circuit is open.
    /// The permit is held for the life of the request (and its response
    /// stream); dropping it releases the slot.
    pub async fn admit(&self) -> Result<OwnedSemaphorePermit> {
        {
            let mut state = self.state.lock();
            if let Some(until) = state.open_until {
                if Instant::now() < until {
                    return Err(self.kind.error(format!(
                        "{} circuit open for another {} ms",
                        self.kind.name(),
                        until.saturating_duration_since(Instant::now()).as_millis()
                    )));
                }
                // Cooldown elapsed; half-open, let requests probe again.
                state.open_until = None;
            }
        }

        self.limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| self.kind.error("adapter pool closed".into()))
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.opens = 0;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.open_after {
            let cooldown = self
                .cooldown
                .checked_mul(1 << state.opens.min(6))
                .unwrap_or(self.max_cooldown)
                .min(self.max_cooldown);
            state.open_until = Some(Instant::now() + cooldown);
            state.opens += 1;
            state.consecutive_failures = 0;
            tracing::warn!(
                adapter = self.kind.name(),
                cooldown_ms = cooldown.as_millis() as u64,
                "adapter circuit opened"
            );
        }
    }

    /// Health snapshot for the `/health` endpoint.
    pub fn snapshot(&self) -> GateSnapshot {
        let state = self.state.lock();
        GateSnapshot {
            adapter: self.kind.name(),
            circuit_open: state
                .open_until
                .map(|until| Instant::now() < until)
                .unwrap_or(false),
            consecutive_failures: state.consecutive_failures,
            in_flight: self.pool_size - self.limiter.available_permits(),
            pool_size: self.pool_size,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GateSnapshot {
    pub adapter: &'static str,
    pub circuit_open: bool,
    pub consecutive_failures: u32,
    pub in_flight: usize,
    pub pool_size: usize,
}
