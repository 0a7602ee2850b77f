//! LLM client for any endpoint following the OpenAI-compatible
//! chat-completions streaming contract (OpenAI, Ollama, vLLM, LM Studio,
//! Together, …).

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;

use vx_domain::config::{CircuitConfig, LlmConfig};
use vx_domain::error::{Error, Result};
use vx_domain::stream::{BoxStream, LlmEvent};

use crate::health::{AdapterGate, AdapterKind};
use crate::sse::sse_response_stream;
use crate::traits::{GenerateRequest, LlmAdapter};

pub struct OpenAiCompatLlm {
    base_url: String,
    client: reqwest::Client,
    gate: Arc<AdapterGate>,
}

impl OpenAiCompatLlm {
    pub fn from_config(cfg: &LlmConfig, circuit: &CircuitConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Llm(format!("building client: {e}")))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            client,
            gate: Arc::new(AdapterGate::new(AdapterKind::Llm, cfg.pool_size, circuit)),
        })
    }

    pub fn gate(&self) -> Arc<AdapterGate> {
        self.gate.clone()
    }

    fn build_body(req: &GenerateRequest) -> Value {
        serde_json::json!({
            "model": req.choice.model_id,
            "messages": [
                { "role": "user", "content": req.prompt },
            ],
            "max_tokens": req.choice.max_tokens,
            "stream": true,
        })
    }
}

fn transport_err(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("llm: {e}"))
    } else {
        Error::Llm(e.to_string())
    }
}

/// Parse one SSE `data:` payload from a chat-completions stream.
fn parse_data(data: &str) -> Vec<Result<LlmEvent>> {
    if data == "[DONE]" {
        return vec![Ok(LlmEvent::Done)];
    }
    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Llm(format!("malformed chunk: {e}")))],
    };
    let delta = value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .unwrap_or("");
    if delta.is_empty() {
        // Role-only or finish_reason-only frames carry no text.
        return Vec::new();
    }
    vec![Ok(LlmEvent::Token {
        text: delta.to_string(),
    })]
}

#[async_trait::async_trait]
impl LlmAdapter for OpenAiCompatLlm {
    async fn generate(
        &self,
        req: GenerateRequest,
    ) -> Result<BoxStream<'static, Result<LlmEvent>>> {
        let permit = self.gate.admit().await?;

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            // The per-request timeout is the router's deadline for the
            // whole call, body included.
            .timeout(Duration::from_millis(req.choice.timeout_ms))
            .json(&Self::build_body(&req))
            .send()
            .await
            .map_err(transport_err);

        let response = match response {
            Ok(r) if r.status().is_success() => {
                self.gate.record_success();
                r
            }
            Ok(r) => {
                self.gate.record_failure();
                return Err(Error::Llm(format!("upstream returned {}", r.status())));
            }
            Err(e) => {
                self.gate.record_failure();
                return Err(e);
            }
        };

        let inner = sse_response_stream(response, parse_data, transport_err);
        let stream = async_stream::stream! {
            let _permit = permit;
            let mut inner = inner;
            while let Some(item) = inner.next().await {
                yield item;
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vx_domain::call::{ModelChoice, ModelReason};

    #[test]
    fn parse_content_delta() {
        let events =
            parse_data(r#"{"choices":[{"delta":{"content":"Hi"},"index":0}]}"#);
        assert_eq!(events.len(), 1);
        assert_eq!(
            *events[0].as_ref().unwrap(),
            LlmEvent::Token { text: "Hi".into() }
        );
    }

    #[test]
    fn parse_role_frame_yields_nothing() {
        let events = parse_data(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#);
        assert!(events.is_empty());
    }

    #[test]
    fn parse_done_sentinel() {
        let events = parse_data("[DONE]");
        assert_eq!(*events[0].as_ref().unwrap(), LlmEvent::Done);
    }

    #[test]
    fn parse_garbage_is_an_error() {
        let events = parse_data("{not json");
        assert!(events[0].is_err());
    }

    #[test]
    fn body_carries_model_and_budget() {
        let req = GenerateRequest {
            prompt: "hello".into(),
            language: "en".into(),
            choice: ModelChoice {
                model_id: "swift-mini".into(),
                reason: ModelReason::Default,
                max_tokens: 128,
                timeout_ms: 5000,
            },
        };
        let body = OpenAiCompatLlm::build_body(&req);
        assert_eq!(body["model"], "swift-mini");
        assert_eq!(body["max_tokens"], 128);
        assert_eq!(body["stream"], true);
    }
}
