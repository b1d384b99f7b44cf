use prometheus::{Encoder, TextEncoder, Registry, IntCounter, IntCounterVec};
use lazy_static::lazy_static;
use std::sync::OnceLock;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static TURN_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static SUMMARY_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static CHUNKS_DELIVERED: OnceLock<IntCounter> = OnceLock::new();

pub fn init_metrics() {
    if let Ok(counter) = IntCounterVec::new(
        prometheus::opts!("requests_total", "Total requests per route"),
        &["route", "status"],
    ) {
        let counter = REQ_COUNTER.get_or_init(|| counter);
        REGISTRY.register(Box::new(counter.clone())).ok();
    }

    if let Ok(counter) = IntCounterVec::new(
        prometheus::opts!("turns_total", "Chat turns by outcome"),
        &["outcome"],
    ) {
        let counter = TURN_COUNTER.get_or_init(|| counter);
        REGISTRY.register(Box::new(counter.clone())).ok();
    }

    if let Ok(counter) = IntCounterVec::new(
        prometheus::opts!("summaries_total", "Summary updates by result"),
        &["result"],
    ) {
        let counter = SUMMARY_COUNTER.get_or_init(|| counter);
        REGISTRY.register(Box::new(counter.clone())).ok();
    }

    if let Ok(counter) = IntCounter::new("chunks_delivered_total", "Reply chunks delivered") {
        let counter = CHUNKS_DELIVERED.get_or_init(|| counter);
        REGISTRY.register(Box::new(counter.clone())).ok();
    }
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}

pub fn inc_turn(outcome: &str) {
    if let Some(counter) = TURN_COUNTER.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn inc_summary(result: &str) {
    if let Some(counter) = SUMMARY_COUNTER.get() {
        counter.with_label_values(&[result]).inc();
    }
}

pub fn inc_chunks(count: usize) {
    if let Some(counter) = CHUNKS_DELIVERED.get() {
        counter.inc_by(count as u64);
    }
}

pub fn render_metrics() -> anyhow::Result<Vec<u8>> {
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

    match render_metrics() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            buffer,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("Metrics encoding failed: {}", e)).into_response(),
    }
}
