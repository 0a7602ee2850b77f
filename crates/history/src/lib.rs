//! Append-only persistence of call sessions and turns.
//!
//! Two JSONL files under the data dir (`sessions.jsonl`, `turns.jsonl`),
//! one logical writer task, fsync per row. Readers run against in-memory
//! projections loaded at startup and kept live on append, so queries never
//! touch the write path.

pub mod search;
pub mod store;

pub use store::{CallHistoryStore, HistoryHealth, SessionSummary};
