//! PARLANCE Engine - Per-Call Orchestration
//!
//! The conversation core: prompt assembly, the tool registry, the response
//! pipeline that turns completion deltas into speech, the per-call state
//! machine that composes them under a lease, the post-call dispatcher, and
//! the cancellation scopes everything runs inside.

mod cancel;
mod dispatcher;
mod metrics;
mod orchestrator;
mod pipeline;
mod prompt;
mod tools;

pub use cancel::CancelScope;
pub use dispatcher::Dispatcher;
pub use metrics::{EngineMetrics, Incident, NoopMetrics};
pub use orchestrator::{CallOrchestrator, CallState, ControlEvent, OrchestratorDeps};
pub use pipeline::{PipelineConfig, ResponsePipeline, TurnFinish, TurnOutput, VoiceParams};
pub use prompt::{
    extract_style_prefix, normalize_whitespace, strip_action_prefix, PromptAssembler, PromptSet,
    TurnContext,
};
pub use tools::{CueSender, ToolControl, ToolOutcome, ToolRegistry};
