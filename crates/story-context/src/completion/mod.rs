//! Completion service seam - remote text generation, blocking and streaming

pub mod llm_worker;

pub use llm_worker::LLMWorker;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::memory::Message;

/// Token usage as reported by the completion endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    /// `None` when the endpoint omitted usage accounting.
    pub usage: Option<Usage>,
}

/// Text deltas in arrival order. Ends after the end-of-stream marker.
pub type DeltaStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> anyhow::Result<Completion>;

    async fn complete_stream(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> anyhow::Result<DeltaStream>;
}
