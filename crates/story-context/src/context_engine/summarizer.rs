//! Incremental story summaries keyed by coverage count.
//!
//! A summary covering messages `1..=n` is built by extending the closest
//! cached summary below `n` with only the messages it does not cover yet.

use crate::completion::CompletionService;
use crate::memory::Message;
use crate::memory_db::{MessageLog, StoredMessage, SummaryCache, SummaryCacheEntry};
use crate::metrics;
use crate::utils::TextUtils;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SUMMARY_PROMPT: &str = "Analyze this conversation and create a comprehensive story summary that captures: \
1. Main characters and their current status \
2. Key plot developments and events \
3. Current setting and situation \
4. Important details and unresolved threads. \
Keep it concise but informative. Format as flowing prose, not bullet points.";

pub const SUMMARY_TEMPERATURE: f32 = 0.5;

/// Returned when no summary can be produced and none was cached before.
pub const SUMMARY_PLACEHOLDER: &str = "Story context available.";

pub struct IncrementalSummarizer {
    log: Arc<dyn MessageLog>,
    cache: Arc<dyn SummaryCache>,
    llm: Arc<dyn CompletionService>,
    summary_max_tokens: usize,
}

impl IncrementalSummarizer {
    pub fn new(
        log: Arc<dyn MessageLog>,
        cache: Arc<dyn SummaryCache>,
        llm: Arc<dyn CompletionService>,
        summary_max_tokens: usize,
    ) -> Self {
        Self { log, cache, llm, summary_max_tokens }
    }

    /// Summary covering messages `1..=target_count` of the session.
    ///
    /// Completion and cache failures degrade to the closest prior summary or
    /// [`SUMMARY_PLACEHOLDER`]; only message store failures are returned as errors.
    pub async fn summarize_to(&self, session_id: &str, target_count: usize) -> anyhow::Result<String> {
        if target_count == 0 {
            return Ok(SUMMARY_PLACEHOLDER.to_string());
        }

        let prior = match self.cache.get_latest_at_most(session_id, target_count) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Summary cache lookup failed for session {}: {}", session_id, e);
                metrics::inc_degraded("summary_cache");
                None
            }
        };

        let request = match &prior {
            Some(entry) if entry.messages_covered == target_count => {
                debug!("Summary for {} already covers {} messages", session_id, target_count);
                return Ok(entry.summary_text.clone());
            }
            Some(entry) => {
                let delta = self.log.range(session_id, entry.messages_covered + 1, target_count)?;
                info!(
                    "Extending summary for {} from {} to {} messages ({} new)",
                    session_id, entry.messages_covered, target_count, delta.len()
                );
                Self::extension_request(entry, &delta)
            }
            None => {
                let history = self.log.range(session_id, 1, target_count)?;
                info!("Summarizing {} messages of {} from scratch", history.len(), session_id);
                Self::fresh_request(&history)
            }
        };

        match self.llm.complete(&request, self.summary_max_tokens as u32, SUMMARY_TEMPERATURE).await {
            Ok(completion) => {
                let summary = TextUtils::tidy_model_output(&completion.text).into_owned();
                if let Err(e) = self.cache.put(session_id, target_count, &summary) {
                    warn!("Failed to cache summary for session {}: {}", session_id, e);
                    metrics::inc_degraded("summary_cache");
                }
                Ok(summary)
            }
            Err(e) => {
                warn!("Summary generation failed for session {}: {}", session_id, e);
                metrics::inc_degraded("summarizer");
                Ok(prior
                    .map(|entry| entry.summary_text)
                    .unwrap_or_else(|| SUMMARY_PLACEHOLDER.to_string()))
            }
        }
    }

    fn transcript(messages: &[StoredMessage]) -> String {
        messages
            .iter()
            .map(|m| format!("{}: {}\n\n", m.role, m.content))
            .collect()
    }

    fn fresh_request(history: &[StoredMessage]) -> Vec<Message> {
        vec![
            Message::system(SUMMARY_PROMPT),
            Message::user(format!(
                "Summarize this story conversation:\n\n{}",
                Self::transcript(history)
            )),
        ]
    }

    fn extension_request(prior: &SummaryCacheEntry, delta: &[StoredMessage]) -> Vec<Message> {
        vec![
            Message::system(SUMMARY_PROMPT),
            Message::user(format!(
                "Here is the story summary so far:\n\n{}\n\n\
                 Extend this summary with the newer events below. Do not start over: \
                 keep what still matters and weave in the new developments.\n\n\
                 Newer events:\n\n{}",
                prior.summary_text,
                Self::transcript(delta)
            )),
        ]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::completion::testing::ScriptedCompletion;
    use crate::memory::Role;
    use crate::memory_db::{MemoryDatabase, NewMessage};
    use std::sync::Mutex;

    /// Message log wrapper recording every `range` request.
    pub(crate) struct SpyLog {
        pub(crate) db: Arc<MemoryDatabase>,
        pub(crate) ranges: Mutex<Vec<(usize, usize)>>,
    }

    impl SpyLog {
        pub(crate) fn new(db: Arc<MemoryDatabase>) -> Self {
            Self { db, ranges: Mutex::new(Vec::new()) }
        }

        pub(crate) fn ranges(&self) -> Vec<(usize, usize)> {
            self.ranges.lock().unwrap().clone()
        }
    }

    impl MessageLog for SpyLog {
        fn count(&self, session_id: &str) -> anyhow::Result<usize> {
            self.db.conversations.count(session_id)
        }
        fn last_n(&self, session_id: &str, n: usize) -> anyhow::Result<Vec<StoredMessage>> {
            self.db.conversations.last_n(session_id, n)
        }
        fn range(&self, session_id: &str, start: usize, end: usize) -> anyhow::Result<Vec<StoredMessage>> {
            self.ranges.lock().unwrap().push((start, end));
            self.db.conversations.range(session_id, start, end)
        }
        fn append(&self, session_id: &str, message: NewMessage<'_>) -> anyhow::Result<StoredMessage> {
            self.db.conversations.append(session_id, message)
        }
        fn append_batch(&self, session_id: &str, messages: &[NewMessage<'_>]) -> anyhow::Result<Vec<StoredMessage>> {
            self.db.conversations.append_batch(session_id, messages)
        }
    }

    /// Summary cache whose every operation fails.
    struct BrokenCache;

    impl SummaryCache for BrokenCache {
        fn get(&self, _: &str, _: usize) -> anyhow::Result<Option<String>> {
            Err(anyhow::anyhow!("cache offline"))
        }
        fn get_latest(&self, _: &str) -> anyhow::Result<Option<SummaryCacheEntry>> {
            Err(anyhow::anyhow!("cache offline"))
        }
        fn get_latest_at_most(&self, _: &str, _: usize) -> anyhow::Result<Option<SummaryCacheEntry>> {
            Err(anyhow::anyhow!("cache offline"))
        }
        fn put(&self, _: &str, _: usize, _: &str) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("cache offline"))
        }
    }

    pub(crate) fn seed(db: &MemoryDatabase, session_id: &str, n: usize) {
        let contents: Vec<String> = (1..=n).map(|i| format!("event {}", i)).collect();
        let batch: Vec<NewMessage<'_>> = contents
            .iter()
            .enumerate()
            .map(|(i, content)| NewMessage {
                role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                content,
                input_tokens: 0,
                output_tokens: 0,
            })
            .collect();
        db.conversations.append_batch(session_id, &batch).unwrap();
    }

    fn summarizer(
        log: Arc<dyn MessageLog>,
        db: &Arc<MemoryDatabase>,
        llm: Arc<ScriptedCompletion>,
    ) -> IncrementalSummarizer {
        let cache: Arc<dyn SummaryCache> = db.clone();
        IncrementalSummarizer::new(log, cache, llm, 2000)
    }

    #[tokio::test]
    async fn test_extends_from_latest_reading_only_the_delta() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        seed(&db, "s", 15);
        db.summaries.put("s", 10, "Ten events happened.").unwrap();

        let spy = Arc::new(SpyLog::new(db.clone()));
        let llm = Arc::new(ScriptedCompletion::replying("Fifteen events happened."));
        let summarizer = summarizer(spy.clone(), &db, llm.clone());

        let summary = summarizer.summarize_to("s", 15).await.unwrap();
        assert_eq!(summary, "Fifteen events happened.");
        assert_eq!(spy.ranges(), vec![(11, 15)]);

        let calls = llm.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].max_tokens, 2000);
        assert!((calls[0].temperature - SUMMARY_TEMPERATURE).abs() < f32::EPSILON);
        let prompt = &calls[0].messages[1].content;
        assert!(prompt.contains("Ten events happened."));
        assert!(prompt.contains("user: event 11"));
        assert!(prompt.contains("user: event 15"));
        assert!(!prompt.contains("event 10\n"));

        assert_eq!(db.summaries.get("s", 15).unwrap().as_deref(), Some("Fifteen events happened."));
        assert_eq!(db.summaries.get("s", 10).unwrap().as_deref(), Some("Ten events happened."));
    }

    #[tokio::test]
    async fn test_builds_from_scratch_without_cache() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        seed(&db, "s", 6);
        let spy = Arc::new(SpyLog::new(db.clone()));
        let llm = Arc::new(ScriptedCompletion::replying("A fresh summary."));
        let summarizer = summarizer(spy.clone(), &db, llm.clone());

        assert_eq!(summarizer.summarize_to("s", 4).await.unwrap(), "A fresh summary.");
        assert_eq!(spy.ranges(), vec![(1, 4)]);
        let prompt = &llm.calls()[0].messages[1].content;
        assert!(prompt.starts_with("Summarize this story conversation:\n\n"));
        assert!(prompt.contains("user: event 1\n\nassistant: event 2\n\n"));
        assert!(!prompt.contains("event 5"));
    }

    #[tokio::test]
    async fn test_ignores_cached_entries_beyond_target() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        seed(&db, "s", 20);
        db.summaries.put("s", 5, "five").unwrap();
        db.summaries.put("s", 18, "eighteen").unwrap();
        let spy = Arc::new(SpyLog::new(db.clone()));
        let llm = Arc::new(ScriptedCompletion::replying("twelve"));
        let summarizer = summarizer(spy.clone(), &db, llm.clone());

        summarizer.summarize_to("s", 12).await.unwrap();
        assert_eq!(spy.ranges(), vec![(6, 12)]);
        assert!(llm.calls()[0].messages[1].content.contains("five"));
    }

    #[tokio::test]
    async fn test_exact_coverage_returns_cached_without_call() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        seed(&db, "s", 12);
        db.summaries.put("s", 12, "all twelve").unwrap();
        let spy = Arc::new(SpyLog::new(db.clone()));
        let llm = Arc::new(ScriptedCompletion::replying("unused"));
        let summarizer = summarizer(spy.clone(), &db, llm.clone());

        assert_eq!(summarizer.summarize_to("s", 12).await.unwrap(), "all twelve");
        assert!(llm.calls().is_empty());
        assert!(spy.ranges().is_empty());
    }

    #[tokio::test]
    async fn test_failure_returns_prior_summary_and_caches_nothing() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        seed(&db, "s", 15);
        db.summaries.put("s", 10, "prior").unwrap();
        let summarizer = summarizer(db.clone(), &db, Arc::new(ScriptedCompletion::failing()));

        assert_eq!(summarizer.summarize_to("s", 15).await.unwrap(), "prior");
        assert_eq!(db.summaries.get("s", 15).unwrap(), None);
    }

    #[tokio::test]
    async fn test_failure_without_prior_returns_placeholder() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        seed(&db, "s", 15);
        let summarizer = summarizer(db.clone(), &db, Arc::new(ScriptedCompletion::failing()));

        assert_eq!(summarizer.summarize_to("s", 5).await.unwrap(), SUMMARY_PLACEHOLDER);
        assert_eq!(db.summaries.count("s").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_target_is_placeholder_without_io() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        let spy = Arc::new(SpyLog::new(db.clone()));
        let llm = Arc::new(ScriptedCompletion::replying("unused"));
        let summarizer = summarizer(spy.clone(), &db, llm.clone());

        assert_eq!(summarizer.summarize_to("s", 0).await.unwrap(), SUMMARY_PLACEHOLDER);
        assert!(spy.ranges().is_empty());
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_broken_cache_degrades_to_fresh_summary() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        seed(&db, "s", 8);
        let log: Arc<dyn MessageLog> = db.clone();
        let llm = Arc::new(ScriptedCompletion::replying("still summarized"));
        let summarizer = IncrementalSummarizer::new(log, Arc::new(BrokenCache), llm.clone(), 2000);

        assert_eq!(summarizer.summarize_to("s", 8).await.unwrap(), "still summarized");
        assert_eq!(llm.calls().len(), 1);
    }
}
