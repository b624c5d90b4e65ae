//! Shrinks oversized turns before they are placed into context.
//!
//! Compression output is ephemeral: the stored message is never rewritten.

use crate::completion::CompletionService;
use crate::config::ContextConfig;
use crate::memory::Message;
use crate::metrics;
use crate::utils::text_utils::{TextUtils, CHARS_PER_TOKEN};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, warn};

pub const COMPRESS_PROMPT: &str = "Summarize the following story segment concisely while preserving key plot points, character actions, and important details. Keep it under 200 words:";
pub const COMPRESS_TEMPERATURE: f32 = 0.8;

pub struct MessageCompressor {
    llm: Arc<dyn CompletionService>,
    threshold_chars: usize,
    compressed_size: usize,
}

impl MessageCompressor {
    pub fn new(llm: Arc<dyn CompletionService>, config: &ContextConfig) -> Self {
        Self {
            llm,
            threshold_chars: config.message_compress_threshold,
            compressed_size: config.message_compressed_size,
        }
    }

    /// Returns `content` unchanged when it is at or below the threshold,
    /// otherwise a condensed rendition. Never fails.
    pub async fn compress<'a>(&self, content: &'a str) -> Cow<'a, str> {
        let length = TextUtils::char_len(content);
        if length <= self.threshold_chars {
            return Cow::Borrowed(content);
        }

        debug!("Compressing message of {} chars", length);
        let request = [
            Message::system(COMPRESS_PROMPT),
            Message::user(content),
        ];
        match self.llm.complete(&request, self.compressed_size as u32, COMPRESS_TEMPERATURE).await {
            Ok(completion) => Cow::Owned(TextUtils::tidy_model_output(&completion.text).into_owned()),
            Err(e) => {
                warn!("Message compression failed, truncating instead: {}", e);
                metrics::inc_degraded("compressor");
                self.fallback(content)
            }
        }
    }

    fn fallback<'a>(&self, content: &'a str) -> Cow<'a, str> {
        TextUtils::truncate_chars(content, self.compressed_size * CHARS_PER_TOKEN)
    }
}
