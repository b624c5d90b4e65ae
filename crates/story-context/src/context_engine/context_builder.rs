//! Final context layout and token budget enforcement

use crate::config::ContextConfig;
use crate::memory::Message;
use crate::utils::text_utils::{TextUtils, CHARS_PER_TOKEN};
use tracing::{debug, warn};

pub const SUMMARY_HEADER: &str = "Story so far: ";

/// Pieces of a turn's context before layout.
#[derive(Debug, Clone, Default)]
pub struct ContextParts {
    pub base_prompt: String,
    /// Summary of everything older than `recent`, if the session has one.
    pub summary: Option<String>,
    /// Trailing history, oldest first.
    pub recent: Vec<Message>,
}

/// Lays out `[system, recent...]` and keeps it under the hard input cap.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    target_input_tokens: usize,
    max_input_tokens: usize,
    summary_max_chars: usize,
}

impl ContextBuilder {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            target_input_tokens: config.target_input_tokens,
            max_input_tokens: config.max_input_tokens,
            summary_max_chars: config.summary_max_tokens * CHARS_PER_TOKEN,
        }
    }

    pub fn system_content(base_prompt: &str, summary: Option<&str>) -> String {
        match summary {
            Some(summary) => format!("{}\n\n{}{}", base_prompt, SUMMARY_HEADER, summary),
            None => base_prompt.to_string(),
        }
    }

    /// Builds the context, dropping the oldest recent entries while the
    /// estimate (including `new_prompt`) exceeds the cap. The system entry and
    /// the newest recent entry always survive; if that is still too large the
    /// summary is cut down. Oversize is never an error.
    pub fn build(&self, parts: ContextParts, new_prompt: &str) -> Vec<Message> {
        let ContextParts { base_prompt, mut summary, mut recent } = parts;

        let prompt_tokens = TextUtils::estimate_tokens(new_prompt);
        let mut system_tokens =
            TextUtils::estimate_tokens(&Self::system_content(&base_prompt, summary.as_deref()));
        let mut recent_tokens = TextUtils::estimate_messages(&recent);

        let mut dropped = 0;
        while system_tokens + recent_tokens + prompt_tokens > self.max_input_tokens && recent.len() > 1 {
            let oldest = recent.remove(0);
            recent_tokens -= TextUtils::estimate_tokens(&oldest.content);
            dropped += 1;
        }
        if dropped > 0 {
            warn!("Dropped {} oldest messages to fit {} token cap", dropped, self.max_input_tokens);
        }

        if system_tokens + recent_tokens + prompt_tokens > self.max_input_tokens {
            if let Some(text) = summary.as_mut() {
                let truncated = TextUtils::truncate_chars(text, self.summary_max_chars).into_owned();
                if truncated.len() < text.len() {
                    warn!("Truncating summary to {} chars to fit token cap", self.summary_max_chars);
                    *text = truncated;
                    system_tokens = TextUtils::estimate_tokens(
                        &Self::system_content(&base_prompt, summary.as_deref()),
                    );
                }
            }
        }

        let total = system_tokens + recent_tokens + prompt_tokens;
        if total > self.target_input_tokens {
            debug!(
                "Context estimate {} tokens exceeds target {} (cap {})",
                total, self.target_input_tokens, self.max_input_tokens
            );
        }

        let mut context = Vec::with_capacity(recent.len() + 1);
        context.push(Message::system(Self::system_content(&base_prompt, summary.as_deref())));
        context.extend(recent);
        context
    }
}
