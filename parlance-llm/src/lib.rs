//! PARLANCE LLM - Streaming Completion Driver
//!
//! Provider-agnostic chat-completion types, the streaming driver with
//! retry and tier fallback, tool-call delta assembly with JSON repair, and
//! context-window budgeting. The OpenAI-compatible provider lives under
//! `providers`; other backends implement `CompletionProvider`.

mod driver;
pub mod providers;
mod repair;
mod retry;
mod tokens;
mod types;

pub use driver::{LlmDriver, ToolCallAccumulator, INVALID_PARALLEL_TOOL};
pub use repair::repair_json;
pub use retry::Backoff;
pub use tokens::{estimate_tokens, window_messages};
pub use types::{
    ChatMessage, ChatRole, CompletionDelta, CompletionProvider, CompletionRequest,
    CompletionStream, FinishReason, ToolCallDelta, ToolSpec, WireToolCall,
};
