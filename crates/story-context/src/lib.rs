// story-context/src/lib.rs

pub mod completion;
pub mod config;
pub mod context_engine;
pub mod memory;
pub mod memory_db;
pub mod metrics;
pub mod rate_limiter;
pub mod shared_state;
pub mod telemetry;
pub mod turn;
pub mod utils;

#[cfg(feature = "cli")]
pub mod api;
#[cfg(feature = "cli")]
pub mod server;

// Public API exports
pub use completion::{Completion, CompletionService, LLMWorker, Usage};
pub use config::{Config, ContextConfig};
pub use context_engine::ContextOrchestrator;
pub use memory::{Message, Role};
pub use memory_db::{MemoryDatabase, MessageLog, SummaryCache};
pub use rate_limiter::RateLimiter;
pub use shared_state::UnifiedAppState;
pub use turn::{TurnError, TurnOutcome, TurnProcessor};

#[cfg(feature = "cli")]
pub use server::{build_router, run_server};
