// story-context/src/telemetry.rs

use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_level(true)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Span wrapping one chat turn; `turn_id` correlates every log line of the turn.
pub fn turn_span(session_id: &str) -> tracing::Span {
    let turn_id = uuid::Uuid::new_v4();
    tracing::info_span!("turn", session_id = %session_id, turn_id = %turn_id)
}
