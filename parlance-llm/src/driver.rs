//! Streaming completion driver with retry and tier fallback.
//!
//! Opening a stream retries transient failures with jittered backoff on the
//! requested tier, then falls back once to the other tier. Errors yielded
//! mid-stream propagate to the consumer, which owns turn-level retry.
//! Cancellation is dropping the stream: the underlying connection closes
//! with it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parlance_core::{LlmError, LlmSettings, ModelTier, RetryConfig, ToolCall};

use crate::providers::OpenAiProvider;
use crate::{
    repair_json, Backoff, CompletionProvider, CompletionRequest, CompletionStream, ToolCallDelta,
};

/// Bogus tool name some models emit when they try to parallelize calls
/// client-side; a completion containing it is retried. Matched against the
/// raw incoming name, before any sanitization.
pub const INVALID_PARALLEL_TOOL: &str = "multi_tool_use.parallel";

/// Two-tier completion driver.
pub struct LlmDriver {
    settings: LlmSettings,
    fast: Arc<dyn CompletionProvider>,
    slow: Arc<dyn CompletionProvider>,
    retry: RetryConfig,
}

impl LlmDriver {
    pub fn new(
        settings: LlmSettings,
        fast: Arc<dyn CompletionProvider>,
        slow: Arc<dyn CompletionProvider>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            settings,
            fast,
            slow,
            retry,
        }
    }

    /// Driver over OpenAI-compatible endpoints for both tiers.
    pub fn openai(settings: LlmSettings, retry: RetryConfig) -> Self {
        let fast = Arc::new(OpenAiProvider::new("fast", 60));
        let slow = Arc::new(OpenAiProvider::new("slow", 30));
        Self::new(settings, fast, slow, retry)
    }

    fn provider(&self, tier: ModelTier) -> &dyn CompletionProvider {
        match tier {
            ModelTier::Fast => self.fast.as_ref(),
            ModelTier::Slow => self.slow.as_ref(),
        }
    }

    /// Open a completion stream on `tier`, falling back once to the other
    /// tier when the requested one stays unavailable.
    pub async fn open_stream(
        &self,
        tier: ModelTier,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, LlmError> {
        match self.open_on_tier(tier, request).await {
            Ok(stream) => Ok(stream),
            Err(e) if retryable(&e) => {
                let fallback = tier.fallback();
                tracing::warn!(
                    from = %tier,
                    to = %fallback,
                    error = %e,
                    "tier exhausted, falling back"
                );
                self.open_on_tier(fallback, request).await
            }
            Err(e) => Err(e),
        }
    }

    async fn open_on_tier(
        &self,
        tier: ModelTier,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, LlmError> {
        let settings = self.settings.tier(tier).clone();
        let provider = self.provider(tier);
        let mut backoff = Backoff::new(self.retry.clone());
        loop {
            match provider.complete_stream(&settings, request).await {
                Ok(stream) => return Ok(stream),
                Err(e) if retryable(&e) => match backoff.next_delay() {
                    Some(delay) => {
                        tracing::warn!(
                            %tier,
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "completion attempt failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }
}

fn retryable(error: &LlmError) -> bool {
    matches!(
        error,
        LlmError::RequestFailed { .. }
            | LlmError::RateLimited { .. }
            | LlmError::InvalidResponse { .. }
            | LlmError::EmptyCompletion
    )
}

// ============================================================================
// TOOL CALL ASSEMBLY
// ============================================================================

/// Accumulates tool-call fragments by index and assembles them once the
/// stream ends, repairing slightly-malformed argument JSON.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    slots: BTreeMap<usize, ToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment.
    pub fn feed(&mut self, delta: &ToolCallDelta) {
        let slot = self.slots.entry(delta.index).or_default();
        if let Some(id) = &delta.id {
            slot.id = id.clone();
        }
        if let Some(name) = &delta.name {
            slot.name = name.clone();
        }
        if let Some(arguments) = &delta.arguments {
            slot.arguments.push_str(arguments);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Assemble the buffered calls in index order. Argument JSON is
    /// repaired; slots that never received a name are dropped, and missing
    /// ids are synthesized so tool results can always be correlated.
    pub fn finish(self) -> Vec<ToolCall> {
        self.slots
            .into_iter()
            .filter_map(|(index, mut call)| {
                if call.name.is_empty() {
                    tracing::warn!(index, "dropping nameless tool call fragment");
                    return None;
                }
                if call.id.is_empty() {
                    call.id = format!("call_{index}");
                }
                call.arguments = repair_json(&call.arguments);
                Some(call)
            })
            .collect()
    }
}
