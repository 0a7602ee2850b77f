mod adapters;
mod history;
mod pipeline;
mod server;

pub use adapters::*;
pub use history::*;
pub use pipeline::*;
pub use server::*;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub adapters: AdaptersConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Config {
    /// Load configuration from a TOML file. A missing file is not an
    /// error; every option has a default.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn err(field: &str, message: impl Into<String>) -> ConfigIssue {
    ConfigIssue {
        severity: ConfigSeverity::Error,
        field: field.into(),
        message: message.into(),
    }
}

fn warn(field: &str, message: impl Into<String>) -> ConfigIssue {
    ConfigIssue {
        severity: ConfigSeverity::Warning,
        field: field.into(),
        message: message.into(),
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(err("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            issues.push(err("server.host", "host must not be empty"));
        }
        if self.server.max_sessions == 0 {
            issues.push(err("server.max_sessions", "must allow at least one session"));
        }

        let p = &self.pipeline;
        if p.end_of_utterance_ms == 0 {
            issues.push(err(
                "pipeline.end_of_utterance_ms",
                "a zero silence window would close every utterance instantly",
            ));
        }
        if p.auto_interrupt_ms < p.min_user_speech_duration_ms {
            issues.push(err(
                "pipeline.auto_interrupt_ms",
                format!(
                    "must be >= min_user_speech_duration_ms ({} < {})",
                    p.auto_interrupt_ms, p.min_user_speech_duration_ms
                ),
            ));
        }
        if p.inbound_queue_size == 0 || p.outbound_queue_size == 0 {
            issues.push(err(
                "pipeline.inbound_queue_size",
                "queue sizes must be greater than 0",
            ));
        }
        if p.max_chunk_bytes < 1024 {
            issues.push(warn(
                "pipeline.max_chunk_bytes",
                "chunks under 1 KiB will reject most real audio frames",
            ));
        }
        if p.cancellation_latency_ms > 100 {
            issues.push(warn(
                "pipeline.cancellation_latency_ms",
                "interrupts over 100 ms will feel sluggish",
            ));
        }

        let a = &self.adapters;
        for (field, url) in [
            ("adapters.stt.base_url", &a.stt.base_url),
            ("adapters.llm.base_url", &a.llm.base_url),
            ("adapters.tts.base_url", &a.tts.base_url),
        ] {
            if url.is_empty() {
                issues.push(err(field, "base_url must not be empty"));
            } else if !url.starts_with("http://") && !url.starts_with("https://") {
                issues.push(err(
                    field,
                    format!("base_url must start with http:// or https:// (got \"{url}\")"),
                ));
            }
        }
        if a.llm.default_model.is_empty() {
            issues.push(err("adapters.llm.default_model", "must not be empty"));
        }
        if a.llm.fallback_model.is_empty() {
            issues.push(err("adapters.llm.fallback_model", "must not be empty"));
        }
        if a.llm.fallback_model == a.llm.default_model {
            issues.push(warn(
                "adapters.llm.fallback_model",
                "fallback equals default; a failing model will retry against itself",
            ));
        }
        if !(0.0..=1.0).contains(&a.llm.complexity_threshold) {
            issues.push(err(
                "adapters.llm.complexity_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        if a.circuit.open_after == 0 {
            issues.push(err("adapters.circuit.open_after", "must be greater than 0"));
        }

        let h = &self.history;
        if h.persist_slo_ms > 500 {
            issues.push(warn(
                "history.persist_slo_ms",
                "a persist SLO over 500 ms can stall the live pipeline",
            ));
        }
        if h.queue_size == 0 {
            issues.push(err("history.queue_size", "must be greater than 0"));
        }

        issues
    }

    /// True when validation produced no `Error`-severity issues.
    pub fn is_valid(&self) -> bool {
        !self
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error)
    }
}
