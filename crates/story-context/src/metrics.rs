use prometheus::{Encoder, TextEncoder, Registry, IntCounterVec, IntGauge};
use lazy_static::lazy_static;
use std::sync::OnceLock;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}
static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static SUMMARY_CACHE: OnceLock<IntCounterVec> = OnceLock::new();
static DEGRADED: OnceLock<IntCounterVec> = OnceLock::new();
static ACTIVE_STREAMS: OnceLock<IntGauge> = OnceLock::new();

/// Registers all collectors. Recording functions are no-ops until this runs.
pub fn init_metrics() {
    let req_counter = REQ_COUNTER.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("requests_total", "Total requests per route"),
            &["route", "status"]
        ).expect("valid requests_total metric")
    });

    let summary_cache = SUMMARY_CACHE.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("summary_cache_total", "Summary cache lookups by result"),
            &["result"]
        ).expect("valid summary_cache_total metric")
    });

    let degraded = DEGRADED.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("degraded_total", "Fallbacks taken after a failed auxiliary completion"),
            &["component"]
        ).expect("valid degraded_total metric")
    });

    let active_streams = ACTIVE_STREAMS.get_or_init(|| {
        IntGauge::new("active_streams", "Streaming turns in flight").expect("valid active_streams metric")
    });

    REGISTRY.register(Box::new(req_counter.clone())).ok();
    REGISTRY.register(Box::new(summary_cache.clone())).ok();
    REGISTRY.register(Box::new(degraded.clone())).ok();
    REGISTRY.register(Box::new(active_streams.clone())).ok();
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}

pub fn record_summary_cache(hit: bool) {
    if let Some(counter) = SUMMARY_CACHE.get() {
        counter.with_label_values(&[if hit { "hit" } else { "miss" }]).inc();
    }
}

pub fn inc_degraded(component: &str) {
    if let Some(counter) = DEGRADED.get() {
        counter.with_label_values(&[component]).inc();
    }
}

pub fn inc_streams() {
    if let Some(gauge) = ACTIVE_STREAMS.get() {
        gauge.inc();
    }
}

pub fn dec_streams() {
    if let Some(gauge) = ACTIVE_STREAMS.get() {
        gauge.dec();
    }
}

/// Text exposition of every registered collector.
pub fn render() -> anyhow::Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

#[cfg(feature = "cli")]
pub async fn get_metrics() -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    match render() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            buffer,
        ).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
