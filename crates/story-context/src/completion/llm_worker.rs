//! HTTP client for an OpenAI-compatible chat completions endpoint (OpenRouter by default).
//!
//! Blocking calls parse `choices[0].message.content` plus `usage`; streaming calls
//! read SSE `data:` lines and forward `choices[0].delta.content` until `[DONE]`.
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use anyhow::Context;
use tracing::{debug, info, trace};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::completion::{Completion, CompletionService, DeltaStream, Usage};
use crate::config::Config;
use crate::memory::Message;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<ChatDelta>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    content: Option<String>,
}

/// One decoded line of the streaming transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseEvent {
    Delta(String),
    Done,
    Ignored,
}

/// Decode a single SSE line. Comments, keep-alives, empty deltas and
/// unparseable payloads all come back as `Ignored`.
pub(crate) fn parse_sse_line(line: &str) -> SseEvent {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Ignored;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .filter(|content| !content.is_empty())
            .map(SseEvent::Delta)
            .unwrap_or(SseEvent::Ignored),
        Err(e) => {
            trace!("Skipping malformed stream fragment: {}", e);
            SseEvent::Ignored
        }
    }
}

pub struct LLMWorker {
    completion_url: String,
    api_key: String,
    model: String,
    http_client: reqwest::Client,
}

impl LLMWorker {
    pub fn new(
        completion_url: String,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build completion HTTP client")?;
        info!("LLM worker initialized for model {} at {}", model, completion_url);
        Ok(Self { completion_url, api_key, model, http_client })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Self::new(
            config.completion_url.clone(),
            config.api_key.clone(),
            config.model.clone(),
            Duration::from_secs(config.request_timeout_seconds),
        )
    }

    async fn post(&self, request: &ChatCompletionRequest<'_>) -> anyhow::Result<reqwest::Response> {
        let response = self.http_client
            .post(&self.completion_url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Completion request failed: {}", e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Completion backend returned {}: {}", status, body));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionService for LLMWorker {
    async fn complete(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> anyhow::Result<Completion> {
        debug!("Requesting completion ({} messages, max_tokens={})", messages.len(), max_tokens);
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens,
            temperature,
            top_p: None,
            stream: false,
        };
        let response = self.post(&request).await?;
        let completion: ChatCompletionResponse = response.json().await
            .map_err(|e| anyhow::anyhow!("Failed to parse completion response: {}", e))?;
        let text = completion.choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| anyhow::anyhow!("Completion response contained no message content"))?;
        Ok(Completion { text, usage: completion.usage })
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> anyhow::Result<DeltaStream> {
        debug!("Requesting streaming completion ({} messages)", messages.len());
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens,
            temperature,
            top_p: Some(0.9),
            stream: true,
        };
        let response = self.post(&request).await?;
        Ok(sse_deltas(response.bytes_stream()))
    }
}

/// Turns a raw SSE body into text deltas.
///
/// Lines are split on raw bytes and decoded only once complete, so a
/// multi-byte character split across network chunks survives intact.
/// Lines that are not valid UTF-8 are skipped like any other malformed fragment.
pub(crate) fn sse_deltas<S, B, E>(byte_stream: S) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let deltas = async_stream::try_stream! {
        let mut buffer: Vec<u8> = Vec::new();
        futures_util::pin_mut!(byte_stream);
        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result
                .map_err(|e| anyhow::anyhow!("Stream read error: {}", e))?;
            buffer.extend_from_slice(chunk.as_ref());
            while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                match decode_line(&line) {
                    SseEvent::Delta(text) => yield text,
                    SseEvent::Done => return,
                    SseEvent::Ignored => {}
                }
            }
        }
        // body ended without a trailing newline
        if let SseEvent::Delta(text) = decode_line(&buffer) {
            yield text;
        }
    };
    Box::pin(deltas)
}

fn decode_line(line: &[u8]) -> SseEvent {
    match std::str::from_utf8(line) {
        Ok(line) => parse_sse_line(line),
        Err(e) => {
            trace!("Skipping stream line with invalid UTF-8: {}", e);
            SseEvent::Ignored
        }
    }
}
