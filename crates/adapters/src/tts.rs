//! Text-to-speech client with incremental text input.
//!
//! The synthesizer consumes a live text stream (LLM chunks), cuts it at
//! clause boundaries, and issues one `POST {base}/v1/synthesize` per
//! clause, yielding the response body as audio chunks. Audio for the
//! first clause starts flowing while the LLM is still writing the rest.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use vx_domain::config::{CircuitConfig, TtsConfig};
use vx_domain::error::{Error, Result};
use vx_domain::stream::{AudioChunk, BoxStream};

use crate::health::{AdapterGate, AdapterKind};
use crate::traits::TtsAdapter;

/// Shortest clause worth a synthesis round-trip.
const MIN_CLAUSE_CHARS: usize = 24;
/// Force a flush once the buffer grows past this, boundary or not.
const MAX_BUFFER_CHARS: usize = 240;

const CLAUSE_BOUNDARIES: &[char] = &['.', '!', '?', ';', ':', ','];

pub struct HttpTtsClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
    gate: Arc<AdapterGate>,
}

impl HttpTtsClient {
    pub fn from_config(cfg: &TtsConfig, circuit: &CircuitConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Tts(format!("building client: {e}")))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(cfg.timeout_ms),
            client,
            gate: Arc::new(AdapterGate::new(AdapterKind::Tts, cfg.pool_size, circuit)),
        })
    }

    pub fn gate(&self) -> Arc<AdapterGate> {
        self.gate.clone()
    }
}

fn transport_err(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("tts: {e}"))
    } else {
        Error::Tts(e.to_string())
    }
}

/// Cut the next synthesizable clause off the front of `buf`.
///
/// Returns `None` until a clause boundary lands past [`MIN_CLAUSE_CHARS`]
/// (or the buffer overflows [`MAX_BUFFER_CHARS`]). With `force`, drains
/// whatever text remains.
fn next_clause(buf: &mut String, force: bool) -> Option<String> {
    if force {
        let rest = buf.trim().to_string();
        buf.clear();
        return if rest.is_empty() { None } else { Some(rest) };
    }

    let boundary = buf
        .char_indices()
        .find(|(i, c)| *i >= MIN_CLAUSE_CHARS && CLAUSE_BOUNDARIES.contains(c))
        .map(|(i, c)| i + c.len_utf8());

    let cut = match boundary {
        Some(cut) => cut,
        None if buf.len() >= MAX_BUFFER_CHARS => {
            // No boundary in sight, so cut at the last whitespace to avoid
            // splitting a word.
            buf[..MAX_BUFFER_CHARS]
                .rfind(char::is_whitespace)
                .unwrap_or(MAX_BUFFER_CHARS)
        }
        None => return None,
    };

    let clause: String = buf.drain(..cut).collect();
    let clause = clause.trim().to_string();
    if clause.is_empty() {
        None
    } else {
        Some(clause)
    }
}

#[async_trait::async_trait]
impl TtsAdapter for HttpTtsClient {
    async fn synthesize(
        &self,
        text: BoxStream<'static, String>,
        voice: &str,
        language: &str,
    ) -> Result<BoxStream<'static, Result<AudioChunk>>> {
        let permit = self.gate.admit().await?;
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let timeout = self.timeout;
        let gate = self.gate.clone();
        let voice = voice.to_owned();
        let language = language.to_owned();

        let stream = async_stream::stream! {
            let _permit = permit;
            let mut text = text;
            let mut buf = String::new();

            'outer: loop {
                let finished = match text.next().await {
                    Some(piece) => {
                        buf.push_str(&piece);
                        false
                    }
                    None => true,
                };

                while let Some(clause) = next_clause(&mut buf, finished) {
                    let mut segment = match synth_segment(
                        &client, &base_url, timeout, &gate, &clause, &voice, &language,
                    )
                    .await
                    {
                        Ok(s) => s,
                        Err(e) => {
                            yield Err(e);
                            break 'outer;
                        }
                    };
                    while let Some(chunk) = segment.next().await {
                        yield chunk;
                    }
                }

                if finished {
                    break;
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// One synthesis round-trip; yields the chunked response body.
async fn synth_segment(
    client: &reqwest::Client,
    base_url: &str,
    timeout: Duration,
    gate: &AdapterGate,
    text: &str,
    voice: &str,
    language: &str,
) -> Result<BoxStream<'static, Result<AudioChunk>>> {
    let body = serde_json::json!({
        "text": text,
        "voice": voice,
        "language": language,
    });

    let response = client
        .post(format!("{base_url}/v1/synthesize"))
        .timeout(timeout)
        .json(&body)
        .send()
        .await
        .map_err(transport_err);

    let response = match response {
        Ok(r) if r.status().is_success() => {
            gate.record_success();
            r
        }
        Ok(r) => {
            gate.record_failure();
            return Err(Error::Tts(format!("upstream returned {}", r.status())));
        }
        Err(e) => {
            gate.record_failure();
            return Err(e);
        }
    };

    let stream = async_stream::stream! {
        let mut response = response;
        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => yield Ok(AudioChunk { bytes: bytes.to_vec() }),
                Ok(None) => break,
                Err(e) => {
                    yield Err(transport_err(e));
                    break;
                }
            }
        }
    };
    Ok(Box::pin(stream))
}
