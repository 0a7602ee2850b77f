//! Shared domain types for the Voxline workspace: the call/turn data
//! model, the error taxonomy, adapter stream items, and the typed
//! configuration record.

pub mod call;
pub mod config;
pub mod error;
pub mod stream;
