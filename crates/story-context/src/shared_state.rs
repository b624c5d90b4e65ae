//! Application state shared by every request handler.
//!
//! Everything here is an `Arc`; cloning the state is cheap and there is no
//! per-session data held in memory.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::{
    completion::CompletionService,
    config::Config,
    context_engine::ContextOrchestrator,
    memory_db::{MemoryDatabase, MessageLog, SummaryCache},
    rate_limiter::RateLimiter,
    turn::TurnProcessor,
};

#[derive(Clone)]
pub struct UnifiedAppState {
    pub config: Arc<Config>,
    pub database: Arc<MemoryDatabase>,
    pub orchestrator: Arc<ContextOrchestrator>,
    pub turns: Arc<TurnProcessor>,
}

impl UnifiedAppState {
    pub fn new(
        config: Config,
        database: Arc<MemoryDatabase>,
        llm: Arc<dyn CompletionService>,
    ) -> Self {
        let log: Arc<dyn MessageLog> = database.clone();
        let cache: Arc<dyn SummaryCache> = database.clone();
        let orchestrator = Arc::new(ContextOrchestrator::new(
            log.clone(),
            cache,
            llm.clone(),
            config.context.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(config.min_request_interval_ms)));
        let turns = Arc::new(TurnProcessor::new(
            log,
            orchestrator.clone(),
            llm,
            limiter,
            config.max_output_tokens,
            config.temperature,
        ));
        info!("Application state initialized");
        Self {
            config: Arc::new(config),
            database,
            orchestrator,
            turns,
        }
    }
}
