//! Prometheus metrics definitions.
//!
//! One global registry struct, initialized once; the engine reports through
//! `PrometheusEngineMetrics` and the worker/API increment their own
//! counters directly. Scraped at `/metrics`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};

use parlance_engine::{EngineMetrics, Incident};

/// Call-duration buckets (seconds): 15s to 30min.
const CALL_DURATION_BUCKETS: &[f64] = &[15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0];

/// Global metrics instance.
pub static METRICS: Lazy<Result<ParlanceMetrics, prometheus::Error>> =
    Lazy::new(ParlanceMetrics::new);

/// Container for all service metrics.
#[derive(Clone)]
pub struct ParlanceMetrics {
    /// Calls started by this worker
    pub calls_started_total: Counter,
    /// Calls driven to Closed
    pub calls_closed_total: Counter,
    /// Completed assistant turns
    pub turns_total: Counter,
    /// Caller interruptions
    pub barge_ins_total: Counter,
    /// Sentences withheld by content safety
    pub sentences_filtered_total: Counter,
    /// Tool dispatches - labels: tool
    pub tool_calls_total: CounterVec,
    /// Operator-visible incidents - labels: kind
    pub incidents_total: CounterVec,
    /// Queue messages handled - labels: queue, outcome
    pub queue_messages_total: CounterVec,
    /// Calls currently owned by this worker
    pub active_calls: Gauge,
    /// Wall-clock duration of closed calls
    pub call_duration_seconds: Histogram,
}

impl ParlanceMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            calls_started_total: register_counter!(
                "parlance_calls_started_total",
                "Calls started by this worker"
            )?,
            calls_closed_total: register_counter!(
                "parlance_calls_closed_total",
                "Calls driven to the Closed state"
            )?,
            turns_total: register_counter!(
                "parlance_turns_total",
                "Completed assistant turns"
            )?,
            barge_ins_total: register_counter!(
                "parlance_barge_ins_total",
                "Caller interruptions while the bot was speaking"
            )?,
            sentences_filtered_total: register_counter!(
                "parlance_sentences_filtered_total",
                "Sentences withheld by the content filter"
            )?,
            tool_calls_total: register_counter_vec!(
                "parlance_tool_calls_total",
                "Tool dispatches",
                &["tool"]
            )?,
            incidents_total: register_counter_vec!(
                "parlance_incidents_total",
                "Operator-visible incidents",
                &["kind"]
            )?,
            queue_messages_total: register_counter_vec!(
                "parlance_queue_messages_total",
                "Queue messages handled",
                &["queue", "outcome"]
            )?,
            active_calls: register_gauge!(
                "parlance_active_calls",
                "Calls currently owned by this worker"
            )?,
            call_duration_seconds: register_histogram!(
                "parlance_call_duration_seconds",
                "Wall-clock duration of closed calls",
                CALL_DURATION_BUCKETS.to_vec()
            )?,
        })
    }
}

/// Engine-side counter sink backed by the global registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusEngineMetrics;

impl PrometheusEngineMetrics {
    fn with<F: FnOnce(&ParlanceMetrics)>(f: F) {
        if let Ok(metrics) = METRICS.as_ref() {
            f(metrics);
        }
    }
}

impl EngineMetrics for PrometheusEngineMetrics {
    fn on_turn_completed(&self) {
        Self::with(|m| m.turns_total.inc());
    }

    fn on_barge_in(&self) {
        Self::with(|m| m.barge_ins_total.inc());
    }

    fn on_sentence_filtered(&self) {
        Self::with(|m| m.sentences_filtered_total.inc());
    }

    fn on_tool_call(&self, name: &str) {
        Self::with(|m| m.tool_calls_total.with_label_values(&[name]).inc());
    }

    fn on_incident(&self, incident: Incident) {
        let kind = match incident {
            Incident::HardTimeout => "hard_timeout",
            Incident::SaveConflictExhausted => "save_conflict_exhausted",
            Incident::MediaUnreachable => "media_unreachable",
        };
        Self::with(|m| m.incidents_total.with_label_values(&[kind]).inc());
    }
}

/// `GET /metrics` in Prometheus text format.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    match encoder.encode(&families, &mut buffer) {
        Ok(()) => (StatusCode::OK, buffer).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, Vec::new()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        let metrics = METRICS.as_ref().expect("registry must initialize");
        metrics.calls_started_total.inc();
        metrics.tool_calls_total.with_label_values(&["update_claim"]).inc();
        assert!(metrics.calls_started_total.get() >= 1.0);
    }

    #[tokio::test]
    async fn test_metrics_handler_renders() {
        let _ = METRICS.as_ref().expect("registry must initialize");
        PrometheusEngineMetrics.on_barge_in();
        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
