/// Shared error type used across all Voxline crates.
///
/// Variants map 1:1 onto the wire-facing error kinds: the `kind()` string
/// is what clients see in `error` events and REST error payloads, and
/// `recoverable()` decides whether the session survives the error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("STT: {0}")]
    Stt(String),

    #[error("LLM: {0}")]
    Llm(String),

    #[error("TTS: {0}")]
    Tts(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("policy rejected: {0}")]
    PolicyRejected(String),

    #[error("persist: {0}")]
    Persist(String),

    #[error("overloaded: {0}")]
    Overloaded(String),

    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// The wire-facing kind string for `error` events and REST payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Protocol(_) => "protocol",
            Error::Transport(_) => "transport",
            Error::Stt(_) => "stt",
            Error::Llm(_) => "llm",
            Error::Tts(_) => "tts",
            Error::Timeout(_) => "timeout",
            Error::PolicyRejected(_) => "policy_rejected",
            Error::Persist(_) => "persist",
            Error::Overloaded(_) => "overloaded",
            Error::Config(_) => "config",
        }
    }

    /// Whether the session can continue after this error.
    ///
    /// Protocol violations are ignored per-message; adapter failures are
    /// turn-fatal but not session-fatal; persist failures are invisible to
    /// the live call. Transport and overload errors kill the session.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_)
                | Error::Json(_)
                | Error::Stt(_)
                | Error::Llm(_)
                | Error::Tts(_)
                | Error::Timeout(_)
                | Error::PolicyRejected(_)
                | Error::Persist(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_errors_are_recoverable() {
        assert!(Error::Stt("boom".into()).recoverable());
        assert!(Error::Llm("boom".into()).recoverable());
        assert!(Error::Tts("boom".into()).recoverable());
        assert!(Error::Timeout("slow".into()).recoverable());
    }

    #[test]
    fn transport_and_overload_are_fatal() {
        assert!(!Error::Transport("gone".into()).recoverable());
        assert!(!Error::Overloaded("stalled".into()).recoverable());
        assert!(!Error::Config("bad".into()).recoverable());
    }

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(Error::Protocol("x".into()).kind(), "protocol");
        assert_eq!(Error::Persist("x".into()).kind(), "persist");
        assert_eq!(Error::PolicyRejected("x".into()).kind(), "policy_rejected");
    }
}
