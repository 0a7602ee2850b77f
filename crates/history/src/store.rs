//! The call-history store.
//!
//! Write path: callers enqueue rows onto a bounded channel consumed by a
//! single writer task that appends JSONL and fsyncs per row. The enqueue
//! waits at most `persist_slo_ms`; past that the row lands in the
//! in-memory durable-later buffer and shows up on the health gauge
//! instead of stalling the live pipeline.
//!
//! Read path: in-memory projections (sessions, turns, per-session order,
//! word index), loaded from disk at startup and updated on append.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};

use vx_domain::call::{Session, SessionStatus, Turn};
use vx_domain::config::HistoryConfig;
use vx_domain::error::{Error, Result};

use crate::search::TurnIndex;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One session plus basic per-session stats, for `GET /history/:user_id`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: Session,
    pub turns: usize,
    pub interrupted_turns: usize,
}

/// Health gauge for `/health`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HistoryHealth {
    /// Rows queued for the writer plus rows parked in the durable-later buffer.
    pub pending_writes: u64,
    /// Rows that exhausted their write retries at least once.
    pub deferred_rows: usize,
    pub sessions: usize,
    pub turns: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
enum Row {
    Session(Session),
    Turn(Turn),
}

enum WriteCmd {
    Append(Row),
    /// Rewrite both files from the in-memory projections (post-prune).
    Compact { done: oneshot::Sender<()> },
}

struct Shared {
    sessions: RwLock<HashMap<String, Session>>,
    turns: RwLock<HashMap<String, Turn>>,
    /// session_id -> turn ids, append order.
    by_session: RwLock<HashMap<String, Vec<String>>>,
    index: TurnIndex,
    /// Rows handed to the writer but not yet on disk.
    queued: AtomicU64,
    deferred: Mutex<Vec<Row>>,
}

/// Append-only persistence of sessions and turns with query access.
pub struct CallHistoryStore {
    shared: Arc<Shared>,
    writer_tx: Mutex<Option<mpsc::Sender<WriteCmd>>>,
    writer_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    persist_slo: Duration,
}

impl CallHistoryStore {
    /// Load (or create) the store under `cfg.data_path` and start the
    /// writer task. Must run inside a tokio runtime.
    pub fn open(cfg: &HistoryConfig) -> Result<Self> {
        std::fs::create_dir_all(&cfg.data_path).map_err(Error::Io)?;

        let sessions = load_jsonl::<Session>(&cfg.data_path.join("sessions.jsonl"))?;
        let turn_rows = load_jsonl::<Turn>(&cfg.data_path.join("turns.jsonl"))?;

        let index = TurnIndex::new();
        let mut turns = HashMap::new();
        let mut by_session: HashMap<String, Vec<String>> = HashMap::new();
        for turn in turn_rows {
            if turns.contains_key(&turn.turn_id) {
                continue; // replayed row, idempotent by turn_id
            }
            index.index_turn(&turn);
            by_session
                .entry(turn.session_id.clone())
                .or_default()
                .push(turn.turn_id.clone());
            turns.insert(turn.turn_id.clone(), turn);
        }

        let session_map: HashMap<String, Session> = sessions
            .into_iter()
            .map(|s| (s.session_id.clone(), s))
            .collect();

        tracing::info!(
            sessions = session_map.len(),
            turns = turns.len(),
            path = %cfg.data_path.display(),
            "call history loaded"
        );

        let shared = Arc::new(Shared {
            sessions: RwLock::new(session_map),
            turns: RwLock::new(turns),
            by_session: RwLock::new(by_session),
            index,
            queued: AtomicU64::new(0),
            deferred: Mutex::new(Vec::new()),
        });

        let (tx, rx) = mpsc::channel(cfg.queue_size);
        let writer = WriterTask {
            shared: shared.clone(),
            data_path: cfg.data_path.clone(),
            retries: cfg.write_retries,
            backoff: Duration::from_millis(cfg.retry_backoff_ms),
        };
        let handle = tokio::spawn(writer.run(rx));

        Ok(Self {
            shared,
            writer_tx: Mutex::new(Some(tx)),
            writer_handle: Mutex::new(Some(handle)),
            persist_slo: Duration::from_millis(cfg.persist_slo_ms),
        })
    }

    // ── Write API ───────────────────────────────────────────────────

    /// Record a session at connect time.
    pub async fn begin_session(&self, session: Session) {
        self.shared
            .sessions
            .write()
            .insert(session.session_id.clone(), session.clone());
        self.enqueue(Row::Session(session)).await;
    }

    /// Mark a session ended. The superseding row is appended; load-time
    /// replay keeps the latest version.
    pub async fn end_session(&self, session_id: &str, ended_at: DateTime<Utc>) {
        let row = {
            let mut sessions = self.shared.sessions.write();
            match sessions.get_mut(session_id) {
                Some(session) => {
                    session.ended_at = Some(ended_at);
                    session.status = SessionStatus::Ended;
                    session.clone()
                }
                None => return,
            }
        };
        self.enqueue(Row::Session(row)).await;
    }

    /// Append a finalized turn. Idempotent keyed by `turn_id`: replaying
    /// the same turn produces one row.
    pub async fn append_turn(&self, turn: Turn) {
        {
            let mut turns = self.shared.turns.write();
            if turns.contains_key(&turn.turn_id) {
                return;
            }
            turns.insert(turn.turn_id.clone(), turn.clone());
        }
        self.shared.index.index_turn(&turn);
        self.shared
            .by_session
            .write()
            .entry(turn.session_id.clone())
            .or_default()
            .push(turn.turn_id.clone());
        self.enqueue(Row::Turn(turn)).await;
    }

    /// Hand a row to the writer, waiting at most `persist_slo`. Overflow
    /// goes to the durable-later buffer; the caller never learns.
    async fn enqueue(&self, row: Row) {
        let tx = self.writer_tx.lock().clone();
        self.shared.queued.fetch_add(1, Ordering::Relaxed);

        let Some(tx) = tx else {
            self.defer(row);
            return;
        };
        if let Err(e) = tx.send_timeout(WriteCmd::Append(row.clone()), self.persist_slo).await {
            tracing::warn!(error = %e, "history writer queue saturated, deferring row");
            self.defer(row);
        }
    }

    fn defer(&self, row: Row) {
        // Stays counted in `queued` until a retry lands it on disk.
        self.shared.deferred.lock().push(row);
    }

    /// Re-enqueue deferred rows. Called from the maintenance loop.
    pub fn retry_deferred(&self) {
        let rows: Vec<Row> = std::mem::take(&mut *self.shared.deferred.lock());
        if rows.is_empty() {
            return;
        }
        let tx = self.writer_tx.lock().clone();
        let Some(tx) = tx else {
            *self.shared.deferred.lock() = rows;
            return;
        };
        let mut requeued = 0usize;
        for row in rows {
            match tx.try_send(WriteCmd::Append(row.clone())) {
                Ok(()) => requeued += 1,
                Err(_) => self.shared.deferred.lock().push(row),
            }
        }
        if requeued > 0 {
            tracing::info!(requeued, "re-enqueued deferred history rows");
        }
    }

    // ── Query API ───────────────────────────────────────────────────

    pub fn get_history(&self, user_id: &str, limit: usize) -> Vec<SessionSummary> {
        let sessions = self.shared.sessions.read();
        let by_session = self.shared.by_session.read();
        let turns = self.shared.turns.read();

        let mut matching: Vec<&Session> = sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        matching
            .into_iter()
            .take(limit)
            .map(|session| {
                let turn_ids = by_session
                    .get(&session.session_id)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let interrupted = turn_ids
                    .iter()
                    .filter(|id| turns.get(*id).map(|t| t.interrupted).unwrap_or(false))
                    .count();
                SessionSummary {
                    session: session.clone(),
                    turns: turn_ids.len(),
                    interrupted_turns: interrupted,
                }
            })
            .collect()
    }

    pub fn get_turn(&self, turn_id: &str) -> Option<Turn> {
        self.shared.turns.read().get(turn_id).cloned()
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.shared.sessions.read().get(session_id).cloned()
    }

    /// Full-text search over a user's turns, ranked by match count.
    pub fn search_by_text(&self, user_id: &str, query: &str) -> Vec<Turn> {
        let turns = self.shared.turns.read();
        self.shared
            .index
            .search(query)
            .into_iter()
            .filter_map(|(turn_id, _)| turns.get(&turn_id).cloned())
            .filter(|t| t.user_id == user_id)
            .collect()
    }

    /// Drop sessions that ended (and turns that started) before the
    /// cutoff, then compact both files. Returns (sessions, turns) removed.
    pub async fn prune(&self, older_than: DateTime<Utc>) -> (usize, usize) {
        let removed_turns: Vec<String> = {
            let mut turns = self.shared.turns.write();
            let doomed: Vec<String> = turns
                .values()
                .filter(|t| t.started_at < older_than)
                .map(|t| t.turn_id.clone())
                .collect();
            for id in &doomed {
                turns.remove(id);
            }
            doomed
        };
        for id in &removed_turns {
            self.shared.index.forget_turn(id);
        }
        {
            let mut by_session = self.shared.by_session.write();
            for ids in by_session.values_mut() {
                ids.retain(|id| !removed_turns.contains(id));
            }
            by_session.retain(|_, ids| !ids.is_empty());
        }

        let removed_sessions = {
            let mut sessions = self.shared.sessions.write();
            let before = sessions.len();
            sessions.retain(|_, s| match s.ended_at {
                Some(ended) => ended >= older_than,
                None => true, // live sessions are never pruned
            });
            before - sessions.len()
        };

        // Ask the writer to rewrite the files from the surviving rows.
        let tx = self.writer_tx.lock().clone();
        if let Some(tx) = tx {
            let (done_tx, done_rx) = oneshot::channel();
            if tx.send(WriteCmd::Compact { done: done_tx }).await.is_ok() {
                let _ = done_rx.await;
            }
        }

        (removed_sessions, removed_turns.len())
    }

    // ── Lifecycle & health ──────────────────────────────────────────

    pub fn health(&self) -> HistoryHealth {
        HistoryHealth {
            pending_writes: self.shared.queued.load(Ordering::Relaxed),
            deferred_rows: self.shared.deferred.lock().len(),
            sessions: self.shared.sessions.read().len(),
            turns: self.shared.turns.read().len(),
        }
    }

    pub fn pending_writes(&self) -> u64 {
        self.shared.queued.load(Ordering::Relaxed)
    }

    /// Close the writer queue and wait up to `drain` for it to empty.
    /// Returns the number of rows that never reached disk.
    pub async fn shutdown(&self, drain: Duration) -> u64 {
        let tx = self.writer_tx.lock().take();
        drop(tx);
        let handle = self.writer_handle.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(drain, handle).await.is_err() {
                tracing::warn!("history writer did not drain within the shutdown window");
            }
        }
        self.pending_writes()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Writer task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct WriterTask {
    shared: Arc<Shared>,
    data_path: PathBuf,
    retries: u32,
    backoff: Duration,
}

impl WriterTask {
    async fn run(self, mut rx: mpsc::Receiver<WriteCmd>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WriteCmd::Append(row) => {
                    if self.write_with_retry(&row).await {
                        self.shared.queued.fetch_sub(1, Ordering::Relaxed);
                    } else {
                        // Exhausted retries: park the row, keep it counted.
                        tracing::error!("history row exhausted write retries, deferring");
                        self.shared.deferred.lock().push(row);
                    }
                }
                WriteCmd::Compact { done } => {
                    if let Err(e) = self.compact() {
                        tracing::error!(error = %e, "history compaction failed");
                    }
                    let _ = done.send(());
                }
            }
        }
    }

    async fn write_with_retry(&self, row: &Row) -> bool {
        for attempt in 0..=self.retries {
            match self.append_row(row) {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "history write failed");
                    if attempt < self.retries {
                        tokio::time::sleep(self.backoff * 2u32.saturating_pow(attempt)).await;
                    }
                }
            }
        }
        false
    }

    fn append_row(&self, row: &Row) -> Result<()> {
        let (file_name, json) = match row {
            Row::Session(s) => ("sessions.jsonl", serde_json::to_string(s)?),
            Row::Turn(t) => ("turns.jsonl", serde_json::to_string(t)?),
        };
        let path = self.data_path.join(file_name);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(Error::Io)?;
        file.write_all(json.as_bytes()).map_err(Error::Io)?;
        file.write_all(b"\n").map_err(Error::Io)?;
        // Transactional per row: the turn is on disk when this returns.
        file.sync_data().map_err(Error::Io)?;
        Ok(())
    }

    /// Rewrite both files from the in-memory projections via tmp + rename.
    fn compact(&self) -> Result<()> {
        let sessions: Vec<Session> = self.shared.sessions.read().values().cloned().collect();
        let turns: Vec<Turn> = self.shared.turns.read().values().cloned().collect();

        write_compacted(&self.data_path, "sessions.jsonl", &sessions)?;
        write_compacted(&self.data_path, "turns.jsonl", &turns)?;
        tracing::info!(
            sessions = sessions.len(),
            turns = turns.len(),
            "history files compacted"
        );
        Ok(())
    }
}

fn write_compacted<T: serde::Serialize>(dir: &Path, file_name: &str, rows: &[T]) -> Result<()> {
    let tmp = dir.join(format!("{file_name}.tmp"));
    {
        let mut file = std::fs::File::create(&tmp).map_err(Error::Io)?;
        for row in rows {
            let json = serde_json::to_string(row)?;
            file.write_all(json.as_bytes()).map_err(Error::Io)?;
            file.write_all(b"\n").map_err(Error::Io)?;
        }
        file.sync_data().map_err(Error::Io)?;
    }
    std::fs::rename(&tmp, dir.join(file_name)).map_err(Error::Io)?;
    Ok(())
}

fn load_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
    let mut rows = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(row) => rows.push(row),
            Err(e) => {
                // A torn tail line from a crash mid-write is expected;
                // anything else is worth a warning too, but never fatal.
                tracing::warn!(path = %path.display(), error = %e, "skipping malformed history line");
            }
        }
    }
    Ok(rows)
}
