//! PARLANCE service entry point.
//!
//! Bootstraps configuration, wires the stores and bridges, starts the
//! queue worker and the Axum HTTP server, and shuts both down cleanly on
//! ctrl-c (worker drains in-flight calls first).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;

use parlance_api::config::{
    ApiConfig, BotDefaults, GatewayConfig, LlmEnvConfig, WorkerConfig,
};
use parlance_api::providers::{
    GatewayClient, GatewaySafety, GatewaySearch, GatewaySms, GatewaySound, GatewaySynthesizer,
    GatewayTranslator,
};
use parlance_api::telemetry::{init_tracing, PrometheusEngineMetrics, METRICS};
use parlance_api::{create_api_router, ApiError, ApiResult, AppState, Worker, WorkerContext};
use parlance_core::{ConversationConfig, RetryConfig};
use parlance_engine::{ResponsePipeline, ToolRegistry};
use parlance_llm::LlmDriver;
use parlance_media::WsRecognizer;
use parlance_store::{FeatureClient, MemoryCallStore, MemoryKeyValue, MemoryQueue};

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing();
    if let Err(e) = METRICS.as_ref() {
        return Err(ApiError::internal_error(format!(
            "metrics registry failed: {e}"
        )));
    }

    let api_config = ApiConfig::from_env();
    let worker_config = WorkerConfig::from_env();
    let gateway_config = GatewayConfig::from_env();
    let defaults = BotDefaults::from_env().map_err(|e| ApiError::internal_error(e.to_string()))?;
    let llm_settings =
        LlmEnvConfig::from_env().map_err(|e| ApiError::internal_error(e.to_string()))?;

    // In-process backends; hosted document/queue/key-value services plug in
    // behind the same traits
    let store = Arc::new(MemoryCallStore::new());
    let kv = Arc::new(MemoryKeyValue::new());
    let queue = Arc::new(MemoryQueue::new());
    let features = Arc::new(FeatureClient::new(kv.clone()));

    let gateway = GatewayClient::new(&gateway_config);
    let metrics = Arc::new(PrometheusEngineMetrics);
    let pipeline = Arc::new(ResponsePipeline::new(
        GatewaySynthesizer::new(gateway.clone()),
        GatewayTranslator::new(gateway.clone()),
        GatewaySafety::new(gateway.clone()),
        GatewaySound::new(gateway.clone()),
        metrics.clone(),
    ));
    let registry = Arc::new(ToolRegistry::new(
        GatewaySms::new(gateway.clone()),
        GatewaySearch::new(gateway.clone()),
    ));
    let recognizer = Arc::new(WsRecognizer::new(
        gateway_config.stt_endpoint.clone(),
        gateway_config.stt_api_key.clone(),
    ));
    let driver = Arc::new(LlmDriver::openai(llm_settings.clone(), RetryConfig::default()));

    let worker = Worker::new(WorkerContext {
        store: store.clone(),
        queue: queue.clone(),
        kv,
        features,
        driver,
        registry,
        recognizer,
        pipeline,
        metrics,
        defaults: defaults.clone(),
        llm_settings,
        conversation: ConversationConfig::default(),
        worker: worker_config,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run(shutdown_rx).await })
    };

    let state = AppState::new(store, queue, defaults);
    let app = create_api_router(state);

    let addr: SocketAddr = format!("{}:{}", api_config.bind_host, api_config.port)
        .parse()
        .map_err(|e| ApiError::internal_error(format!("invalid bind address: {e}")))?;
    tracing::info!(%addr, "starting PARLANCE API server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("failed to bind {addr}: {e}")))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("server error: {e}")))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    // Drain in-flight calls before exiting
    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;
    Ok(())
}
