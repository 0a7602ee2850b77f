use vx_domain::call::ModelChoice;
use vx_domain::error::Result;
use vx_domain::stream::{AudioChunk, BoxStream, LlmEvent, SttEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One LLM generation request. The [`ModelChoice`] carries the model id,
/// token budget, and per-call deadline the router decided on.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub language: String,
    pub choice: ModelChoice,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Speech-to-text. Yields zero or more `Partial` events followed by one
/// `Final` before the stream ends.
#[async_trait::async_trait]
pub trait SttAdapter: Send + Sync {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        language: &str,
    ) -> Result<BoxStream<'static, Result<SttEvent>>>;
}

/// Large-language-model text generation, streamed token by token.
/// Cancellation is observed between chunks by dropping the stream.
#[async_trait::async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn generate(
        &self,
        req: GenerateRequest,
    ) -> Result<BoxStream<'static, Result<LlmEvent>>>;
}

/// Text-to-speech over an incremental text stream. Implementations buffer
/// inbound text to clause boundaries and produce audio for each clause as
/// soon as enough text is available.
#[async_trait::async_trait]
pub trait TtsAdapter: Send + Sync {
    async fn synthesize(
        &self,
        text: BoxStream<'static, String>,
        voice: &str,
        language: &str,
    ) -> Result<BoxStream<'static, Result<AudioChunk>>>;
}
