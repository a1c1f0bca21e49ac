//! Prometheus metrics for the deposit server.
//!
//! The registry holds the HTTP metrics defined here, the deposit and
//! pipeline gauges refreshed on every scrape, and every collector exported
//! by `deposit_core::metrics`.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use tracing::warn;

use deposit_core::{DepositState, PipelineState};

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "deposit_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["method", "path", "status"],
    )
    .unwrap()
});

pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("deposit_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "deposit_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Status gauges (collected on scrape)
// =============================================================================

/// Deposits by current state.
pub static DEPOSITS_BY_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("deposit_deposits_by_state", "Current deposit count by state"),
        &["state"],
    )
    .unwrap()
});

/// 1 for the pipeline's current state, 0 for the others.
pub static PIPELINE_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("deposit_pipeline_state", "Current pipeline state"),
        &["state"],
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(DEPOSITS_BY_STATE.clone()))
        .unwrap();
    registry.register(Box::new(PIPELINE_STATE.clone())).unwrap();

    for metric in deposit_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Refresh the gauges that mirror stored state.
pub fn collect_dynamic_metrics(state: &AppState) {
    for deposit_state in DepositState::ALL {
        match state.deposits().list_ids_in_state(deposit_state) {
            Ok(ids) => DEPOSITS_BY_STATE
                .with_label_values(&[deposit_state.as_str()])
                .set(ids.len() as i64),
            Err(e) => warn!("Failed to count {} deposits: {}", deposit_state, e),
        }
    }

    match state.pipeline().status() {
        Ok(status) => {
            for pipeline_state in PipelineState::ALL {
                let current = status.state == Some(pipeline_state);
                PIPELINE_STATE
                    .with_label_values(&[pipeline_state.as_str()])
                    .set(current as i64);
            }
        }
        Err(e) => warn!("Failed to read pipeline state: {}", e),
    }
}

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let uuid_regex = regex_lite::Regex::new(
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
    )
    .unwrap();
    let deposit_regex = regex_lite::Regex::new(r"^/api/v1/deposits/[^/]+").unwrap();

    let result = uuid_regex.replace_all(path, "{id}");
    let result = deposit_regex.replace(&result, "/api/v1/deposits/{id}");
    result.to_string()
}
