//! Speech-to-text client.
//!
//! Speaks a narrow contract: `POST {base}/v1/transcribe` with base64 audio
//! and a language tag, answered by an SSE stream of partial/final
//! transcription events.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use futures_util::StreamExt;

use vx_domain::config::{CircuitConfig, SttConfig};
use vx_domain::error::{Error, Result};
use vx_domain::stream::{BoxStream, SttEvent};

use crate::health::{AdapterGate, AdapterKind};
use crate::sse::sse_response_stream;
use crate::traits::SttAdapter;

pub struct HttpSttClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
    gate: Arc<AdapterGate>,
}

impl HttpSttClient {
    pub fn from_config(cfg: &SttConfig, circuit: &CircuitConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Stt(format!("building client: {e}")))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(cfg.timeout_ms),
            client,
            gate: Arc::new(AdapterGate::new(AdapterKind::Stt, cfg.pool_size, circuit)),
        })
    }

    pub fn gate(&self) -> Arc<AdapterGate> {
        self.gate.clone()
    }
}

fn transport_err(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("stt: {e}"))
    } else {
        Error::Stt(e.to_string())
    }
}

#[async_trait::async_trait]
impl SttAdapter for HttpSttClient {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        language: &str,
    ) -> Result<BoxStream<'static, Result<SttEvent>>> {
        let permit = self.gate.admit().await?;

        let body = serde_json::json!({
            "audio": base64::engine::general_purpose::STANDARD.encode(&audio),
            "language": language,
        });

        let response = self
            .client
            .post(format!("{}/v1/transcribe", self.base_url))
            .timeout(self.timeout)
            .json(&body)
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
                return Err(Error::Stt(format!("upstream returned {}", r.status())));
            }
            Err(e) => {
                self.gate.record_failure();
                return Err(e);
            }
        };

        let inner = sse_response_stream(
            response,
            |data| {
                vec![serde_json::from_str::<SttEvent>(data)
                    .map_err(|e| Error::Stt(format!("malformed event: {e}")))]
            },
            transport_err,
        );

        // The permit rides along with the stream so a cancelled turn
        // releases the connection slot as soon as the stream drops.
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
