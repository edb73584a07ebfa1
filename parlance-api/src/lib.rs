//! PARLANCE API - Serving Layer
//!
//! The HTTP surface (`POST /call`, `GET /call`, health, metrics), the
//! queue-consuming worker that runs call orchestrations, the env-driven
//! configuration, and the HTTP bridges to the media gateway.

pub mod config;
pub mod error;
pub mod providers;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod worker;

pub use config::{ApiConfig, BotDefaults, GatewayConfig, LlmEnvConfig, WorkerConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::create_api_router;
pub use state::AppState;
pub use worker::{Worker, WorkerContext};
