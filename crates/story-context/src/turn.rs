//! One chat turn: rate gate, context assembly, primary completion, persistence.

use crate::completion::{CompletionService, DeltaStream, Usage};
use crate::context_engine::ContextOrchestrator;
use crate::memory::{Message, Role};
use crate::memory_db::{MessageLog, NewMessage};
use crate::metrics;
use crate::rate_limiter::RateLimiter;
use crate::telemetry;
use crate::utils::TextUtils;
use futures_util::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Instrument};

#[derive(Debug)]
pub enum TurnError {
    /// Another primary call was admitted less than the minimum interval ago.
    RateLimited { retry_after: Duration },
    /// The primary completion call failed. Never retried here.
    Completion(anyhow::Error),
    /// Message store failure.
    Store(anyhow::Error),
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnError::RateLimited { retry_after } => write!(
                f,
                "Please wait {:.1} seconds before next request",
                retry_after.as_secs_f64()
            ),
            TurnError::Completion(e) => write!(f, "Completion failed: {}", e),
            TurnError::Store(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for TurnError {}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    pub usage: Usage,
    /// Entries sent to the completion service, including the new prompt.
    pub context_messages: usize,
}

pub struct TurnProcessor {
    log: Arc<dyn MessageLog>,
    orchestrator: Arc<ContextOrchestrator>,
    llm: Arc<dyn CompletionService>,
    limiter: Arc<RateLimiter>,
    max_output_tokens: u32,
    temperature: f32,
}

impl TurnProcessor {
    pub fn new(
        log: Arc<dyn MessageLog>,
        orchestrator: Arc<ContextOrchestrator>,
        llm: Arc<dyn CompletionService>,
        limiter: Arc<RateLimiter>,
        max_output_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self { log, orchestrator, llm, limiter, max_output_tokens, temperature }
    }

    /// Rejects early without admitting; the interval is only stamped by
    /// `admit`, right before the primary call.
    async fn prepare(&self, session_id: &str, prompt: &str) -> Result<Vec<Message>, TurnError> {
        self.limiter
            .check()
            .map_err(|retry_after| TurnError::RateLimited { retry_after })?;
        let mut context = self
            .orchestrator
            .assemble(session_id, prompt)
            .await
            .map_err(TurnError::Store)?;
        context.push(Message::user(prompt));
        Ok(context)
    }

    fn admit(&self) -> Result<(), TurnError> {
        self.limiter
            .try_acquire()
            .map_err(|retry_after| TurnError::RateLimited { retry_after })
    }

    /// Runs a blocking turn and persists the user/assistant pair atomically.
    pub async fn run_turn(&self, session_id: &str, prompt: &str) -> Result<TurnOutcome, TurnError> {
        let span = telemetry::turn_span(session_id);
        async {
            let context = self.prepare(session_id, prompt).await?;
            info!("Sending {} context messages", context.len());

            self.admit()?;
            let completion = self
                .llm
                .complete(&context, self.max_output_tokens, self.temperature)
                .await
                .map_err(TurnError::Completion)?;

            let usage = completion.usage.unwrap_or_else(|| {
                estimated_usage(&context, &completion.text)
            });
            persist_turn(self.log.as_ref(), session_id, prompt, &completion.text, &usage)
                .map_err(TurnError::Store)?;

            info!(
                "Turn complete: {} prompt tokens, {} completion tokens",
                usage.prompt_tokens, usage.completion_tokens
            );
            Ok::<_, TurnError>(TurnOutcome {
                reply: completion.text,
                usage,
                context_messages: context.len(),
            })
        }
        .instrument(span)
        .await
    }

    /// Starts a streaming turn. Deltas are forwarded as they arrive; the turn
    /// is persisted with estimated usage only once the stream has ended.
    /// Dropping the stream early persists nothing.
    pub async fn stream_turn(&self, session_id: &str, prompt: &str) -> Result<DeltaStream, TurnError> {
        let span = telemetry::turn_span(session_id);
        let (context, upstream) = async {
            let context = self.prepare(session_id, prompt).await?;
            info!("Streaming with {} context messages", context.len());
            self.admit()?;
            let upstream = self
                .llm
                .complete_stream(&context, self.max_output_tokens, self.temperature)
                .await
                .map_err(TurnError::Completion)?;
            Ok::<_, TurnError>((context, upstream))
        }
        .instrument(span.clone())
        .await?;

        let log = self.log.clone();
        let session_id = session_id.to_string();
        let prompt = prompt.to_string();

        let deltas = async_stream::try_stream! {
            let _active = ActiveStream::start();
            let mut reply = String::new();
            let mut upstream = upstream;
            while let Some(delta) = upstream.next().await {
                let delta = delta?;
                reply.push_str(&delta);
                yield delta;
            }

            let usage = estimated_usage(&context, &reply);
            span.in_scope(|| {
                persist_turn(log.as_ref(), &session_id, &prompt, &reply, &usage)?;
                info!("Streamed turn complete: ~{} completion tokens", usage.completion_tokens);
                Ok::<_, anyhow::Error>(())
            })?;
        };
        Ok(Box::pin(deltas))
    }
}

/// Usage derived from the length heuristic when the service reports none.
fn estimated_usage(context: &[Message], reply: &str) -> Usage {
    let prompt_tokens = TextUtils::estimate_messages(context) as u64;
    let completion_tokens = TextUtils::estimate_tokens(reply) as u64;
    Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
    }
}

fn persist_turn(
    log: &dyn MessageLog,
    session_id: &str,
    prompt: &str,
    reply: &str,
    usage: &Usage,
) -> anyhow::Result<()> {
    log.append_batch(session_id, &[
        NewMessage {
            role: Role::User,
            content: prompt,
            input_tokens: usage.prompt_tokens as i64,
            output_tokens: 0,
        },
        NewMessage {
            role: Role::Assistant,
            content: reply,
            input_tokens: 0,
            output_tokens: usage.completion_tokens as i64,
        },
    ])
    .map_err(|e| {
        warn!("Failed to persist turn for session {}: {}", session_id, e);
        e
    })?;
    Ok(())
}

/// Tracks in-flight streams for the `active_streams` gauge.
struct ActiveStream;

impl ActiveStream {
    fn start() -> Self {
        metrics::inc_streams();
        ActiveStream
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        metrics::dec_streams();
    }
}
