use crate::completion::CompletionService;
use crate::config::ContextConfig;
use crate::context_engine::{
    context_builder::{ContextBuilder, ContextParts},
    message_compressor::MessageCompressor,
    summarizer::IncrementalSummarizer,
};
use crate::memory::Message;
use crate::memory_db::{MessageLog, StoredMessage, SummaryCache};
use crate::metrics;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decides, per turn, which history the completion service sees: a summary
/// of older messages plus the most recent ones, compressed and budgeted.
///
/// Holds no per-session state; every call reads the durable store.
pub struct ContextOrchestrator {
    log: Arc<dyn MessageLog>,
    cache: Arc<dyn SummaryCache>,
    summarizer: IncrementalSummarizer,
    compressor: MessageCompressor,
    builder: ContextBuilder,
    config: ContextConfig,
}

impl ContextOrchestrator {
    pub fn new(
        log: Arc<dyn MessageLog>,
        cache: Arc<dyn SummaryCache>,
        llm: Arc<dyn CompletionService>,
        config: ContextConfig,
    ) -> Self {
        let summarizer = IncrementalSummarizer::new(
            log.clone(),
            cache.clone(),
            llm.clone(),
            config.summary_max_tokens,
        );
        let compressor = MessageCompressor::new(llm, &config);
        let builder = ContextBuilder::new(&config);
        info!(
            "Context orchestrator initialized (recent={}, max_input_tokens={})",
            config.recent_message_count, config.max_input_tokens
        );
        Self { log, cache, summarizer, compressor, builder, config }
    }

    /// Context for the next turn of `session_id`, without the new prompt itself.
    ///
    /// `new_prompt` only counts toward the token budget.
    pub async fn assemble(&self, session_id: &str, new_prompt: &str) -> anyhow::Result<Vec<Message>> {
        let total = self.log.count(session_id)?;
        let recent_count = self.config.recent_message_count;

        let (summary, history) = if total <= recent_count {
            (None, self.log.last_n(session_id, total)?)
        } else {
            let old_count = total - recent_count;
            let summary = self.summary_for(session_id, old_count).await?;
            (Some(summary), self.log.last_n(session_id, recent_count)?)
        };

        debug!(
            "Assembling context for {}: {} total, {} recent, summary={}",
            session_id, total, history.len(), summary.is_some()
        );

        let recent = self.compress_all(&history).await;
        let parts = ContextParts {
            base_prompt: self.config.system_prompt.clone(),
            summary,
            recent,
        };
        Ok(self.builder.build(parts, new_prompt))
    }

    /// Summary of everything older than the recent window, with the number of
    /// messages it covers. `("", 0)` while the whole session fits the window.
    pub async fn get_or_build_summary(&self, session_id: &str) -> anyhow::Result<(String, usize)> {
        let total = self.log.count(session_id)?;
        if total <= self.config.recent_message_count {
            return Ok((String::new(), 0));
        }
        let old_count = total - self.config.recent_message_count;
        let summary = self.summary_for(session_id, old_count).await?;
        Ok((summary, old_count))
    }

    /// Exact-match cache lookup at `old_count`, summarizing on a miss.
    async fn summary_for(&self, session_id: &str, old_count: usize) -> anyhow::Result<String> {
        match self.cache.get(session_id, old_count) {
            Ok(Some(summary)) => {
                metrics::record_summary_cache(true);
                debug!("Summary cache hit for {} at {}", session_id, old_count);
                return Ok(summary);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Summary cache read failed for {}: {}", session_id, e);
                metrics::inc_degraded("summary_cache");
            }
        }
        metrics::record_summary_cache(false);
        self.summarizer.summarize_to(session_id, old_count).await
    }

    async fn compress_all(&self, history: &[StoredMessage]) -> Vec<Message> {
        let mut recent = Vec::with_capacity(history.len());
        for message in history {
            let content = self.compressor.compress(&message.content).await;
            recent.push(Message::new(message.role, content.into_owned()));
        }
        recent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::testing::ScriptedCompletion;
    use crate::context_engine::context_builder::SUMMARY_HEADER;
    use crate::context_engine::message_compressor::COMPRESS_PROMPT;
    use crate::context_engine::summarizer::tests::seed;
    use crate::memory::Role;
    use crate::memory_db::{MemoryDatabase, NewMessage};

    /// Replies "compressed" to compression requests and `summary` otherwise.
    fn scripted(summary: &'static str) -> Arc<ScriptedCompletion> {
        Arc::new(ScriptedCompletion::new(move |messages, _| {
            if messages[0].content == COMPRESS_PROMPT {
                Ok("compressed".to_string())
            } else {
                Ok(summary.to_string())
            }
        }))
    }

    fn orchestrator(db: &Arc<MemoryDatabase>, llm: Arc<ScriptedCompletion>) -> ContextOrchestrator {
        ContextOrchestrator::new(db.clone(), db.clone(), llm, ContextConfig::default())
    }

    #[tokio::test]
    async fn test_empty_session_is_system_prompt_only() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        let llm = scripted("unused");
        let context = orchestrator(&db, llm.clone()).assemble("s", "Hello").await.unwrap();

        assert_eq!(context.len(), 1);
        assert_eq!(context[0].role, Role::System);
        assert_eq!(context[0].content, ContextConfig::default().system_prompt);
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_short_session_sends_all_history_without_summary() {
        for total in [1usize, 7, 10] {
            let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
            seed(&db, "s", total);
            let llm = scripted("unused");
            let context = orchestrator(&db, llm.clone()).assemble("s", "next").await.unwrap();

            assert_eq!(context.len(), total + 1);
            assert!(!context[0].content.contains(SUMMARY_HEADER));
            assert_eq!(context[1].content, "event 1");
            assert_eq!(context[total].content, format!("event {}", total));
            assert!(llm.calls().is_empty());
        }
    }

    #[tokio::test]
    async fn test_long_session_sends_summary_plus_recent_window() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        seed(&db, "s", 26);
        let orchestrator = orchestrator(&db, scripted("The long road so far."));

        let context = orchestrator.assemble("s", "next").await.unwrap();

        assert_eq!(context.len(), 11);
        assert!(context[0].content.ends_with("Story so far: The long road so far."));
        assert_eq!(context[1].content, "event 17");
        assert_eq!(context[10].content, "event 26");
        assert_eq!(db.summaries.get("s", 16).unwrap().as_deref(), Some("The long road so far."));
    }

    #[tokio::test]
    async fn test_cached_coverage_is_reused_and_survives_growth() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        seed(&db, "s", 25);
        db.summaries.put("s", 15, "fifteen").unwrap();
        let llm = scripted("sixteen");
        let orchestrator = orchestrator(&db, llm.clone());

        let context = orchestrator.assemble("s", "next").await.unwrap();
        assert!(context[0].content.ends_with("fifteen"));
        assert!(llm.calls().is_empty());

        db.conversations.append("s", NewMessage {
            role: Role::Assistant, content: "event 26", input_tokens: 0, output_tokens: 0,
        }).unwrap();
        let context = orchestrator.assemble("s", "next").await.unwrap();
        assert!(context[0].content.ends_with("sixteen"));

        let calls = llm.calls();
        assert_eq!(calls.len(), 1);
        let prompt = &calls[0].messages[1].content;
        assert!(prompt.contains("fifteen"));
        assert!(prompt.contains("assistant: event 16"));
        assert!(!prompt.contains("event 15\n"));

        assert_eq!(db.summaries.get("s", 15).unwrap().as_deref(), Some("fifteen"));
        assert_eq!(db.summaries.get("s", 16).unwrap().as_deref(), Some("sixteen"));
    }

    #[tokio::test]
    async fn test_oversized_messages_are_compressed_but_not_rewritten() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        let long = "The dragon circled the tower. ".repeat(100);
        db.conversations.append_batch("s", &[
            NewMessage { role: Role::User, content: "Tell me a story", input_tokens: 0, output_tokens: 0 },
            NewMessage { role: Role::Assistant, content: &long, input_tokens: 0, output_tokens: 0 },
        ]).unwrap();
        let llm = scripted("unused");

        let context = orchestrator(&db, llm.clone()).assemble("s", "go on").await.unwrap();
        assert_eq!(context.len(), 3);
        assert_eq!(context[1].content, "Tell me a story");
        assert_eq!(context[2].role, Role::Assistant);
        assert_eq!(context[2].content, "compressed");
        assert_eq!(llm.calls().len(), 1);

        let stored = db.conversations.last_n("s", 1).unwrap();
        assert_eq!(stored[0].content, long);
    }

    #[tokio::test]
    async fn test_summary_failure_degrades_to_placeholder() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        seed(&db, "s", 12);
        let orchestrator = orchestrator(&db, Arc::new(ScriptedCompletion::failing()));

        let context = orchestrator.assemble("s", "next").await.unwrap();
        assert_eq!(context.len(), 11);
        assert!(context[0].content.ends_with("Story so far: Story context available."));
    }

    #[tokio::test]
    async fn test_get_or_build_summary() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        seed(&db, "s", 10);
        let orchestrator = orchestrator(&db, scripted("two so far"));
        assert_eq!(orchestrator.get_or_build_summary("s").await.unwrap(), (String::new(), 0));

        seed(&db, "s", 2);
        assert_eq!(
            orchestrator.get_or_build_summary("s").await.unwrap(),
            ("two so far".to_string(), 2)
        );
    }
}
