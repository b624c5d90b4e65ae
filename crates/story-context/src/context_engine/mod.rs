//! Context engine module - assembles per-turn context from summaries and recent history

pub mod context_builder;
pub mod message_compressor;
pub mod summarizer;
pub mod orchestrator;

pub use context_builder::{ContextBuilder, ContextParts};
pub use message_compressor::MessageCompressor;
pub use summarizer::IncrementalSummarizer;
pub use orchestrator::ContextOrchestrator;
