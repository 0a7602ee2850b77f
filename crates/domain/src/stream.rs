use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for all adapter streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted by a speech-to-text stream.
///
/// A well-behaved STT backend yields zero or more `Partial` events and
/// exactly one `Final` before the stream ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SttEvent {
    Partial { text: String },
    Final { text: String },
}

/// Events emitted by an LLM text stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmEvent {
    /// An incremental text chunk.
    Token { text: String },
    /// The stream finished cleanly.
    Done,
}

/// One synthesized audio chunk. Opaque bytes in the codec the TTS
/// backend was configured for; the pipeline never inspects them.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub bytes: Vec<u8>,
}
