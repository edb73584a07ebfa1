//! Observability: tracing bootstrap and Prometheus metrics.

mod metrics;

pub use metrics::{metrics_handler, ParlanceMetrics, PrometheusEngineMetrics, METRICS};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber once at startup. `RUST_LOG` controls
/// the filter; defaults keep dependencies quiet and the service at info.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn,tungstenite=warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}
