//! Static configuration types.
//!
//! These are process-wide snapshots built at startup (or refreshed on a
//! timer for the runtime-tunable subset) and handed to each call scope.
//! They are never mutated in place; a refresh produces a new snapshot that
//! applies from the next turn on.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ModelTier;

// ============================================================================
// RETRY
// ============================================================================

/// Jittered exponential backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        // Parameters carried over from the completion retry policy:
        // short-lived usage, 3 attempts, 0.8s seed, 8s cap.
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(800),
            max_backoff: Duration::from_secs(8),
            backoff_multiplier: 2.0,
        }
    }
}

// ============================================================================
// LLM TIERS
// ============================================================================

/// Connection settings for one model tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmTierSettings {
    /// Chat-completions base URL, e.g. "https://api.openai.com/v1"
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    /// Context window in tokens
    pub context_window: usize,
    /// Whether the endpoint supports server-sent-event streaming
    pub streaming: bool,
}

/// Both tiers of the completion service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmSettings {
    pub fast: LlmTierSettings,
    pub slow: LlmTierSettings,
}

impl LlmSettings {
    pub fn tier(&self, tier: ModelTier) -> &LlmTierSettings {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Slow => &self.slow,
        }
    }
}

// ============================================================================
// FEATURE FLAGS
// ============================================================================

/// Runtime-tunable parameters, refreshed with bounded staleness.
///
/// Defaults match the flag table of the conversation service; every field
/// has a corresponding key in the config store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Abort the turn when no full response was produced in time
    pub answer_hard_timeout_sec: u64,
    /// Speak a "still working" cue when the first sentence is late
    pub answer_soft_timeout_sec: u64,
    /// Retention before a Call is considered stale for callbacks
    pub callback_timeout_hour: u64,
    /// Continuous silence before an IdleWarn
    pub phone_silence_timeout_sec: u64,
    /// Consecutive silent recognitions before giving up on the caller
    pub recognition_retry_max: u32,
    /// Record media to the object store
    pub recording_enabled: bool,
    /// Force the slow tier for conversational turns
    pub slow_llm_for_chat: bool,
    /// Silence window closing a final recognition
    pub vad_silence_timeout_ms: u64,
    /// Grace period after recognition-complete
    pub vad_cutoff_timeout_ms: u64,
    /// VAD sensitivity, 0.1..=1.0
    pub vad_threshold: f64,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            answer_hard_timeout_sec: 15,
            answer_soft_timeout_sec: 4,
            callback_timeout_hour: 3,
            phone_silence_timeout_sec: 20,
            recognition_retry_max: 3,
            recording_enabled: false,
            slow_llm_for_chat: false,
            vad_silence_timeout_ms: 500,
            vad_cutoff_timeout_ms: 250,
            vad_threshold: 0.5,
        }
    }
}

impl FeatureFlags {
    /// The model tier conversational turns should use under this snapshot.
    pub fn chat_tier(&self) -> ModelTier {
        if self.slow_llm_for_chat {
            ModelTier::Slow
        } else {
            ModelTier::Fast
        }
    }
}

/// Config-store keys for every runtime-tunable flag.
pub mod feature_keys {
    pub const ANSWER_HARD_TIMEOUT_SEC: &str = "answer_hard_timeout_sec";
    pub const ANSWER_SOFT_TIMEOUT_SEC: &str = "answer_soft_timeout_sec";
    pub const CALLBACK_TIMEOUT_HOUR: &str = "callback_timeout_hour";
    pub const PHONE_SILENCE_TIMEOUT_SEC: &str = "phone_silence_timeout_sec";
    pub const RECOGNITION_RETRY_MAX: &str = "recognition_retry_max";
    pub const RECORDING_ENABLED: &str = "recording_enabled";
    pub const SLOW_LLM_FOR_CHAT: &str = "slow_llm_for_chat";
    pub const VAD_SILENCE_TIMEOUT_MS: &str = "vad_silence_timeout_ms";
    pub const VAD_CUTOFF_TIMEOUT_MS: &str = "vad_cutoff_timeout_ms";
    pub const VAD_THRESHOLD: &str = "vad_threshold";
}

// ============================================================================
// CONVERSATION
// ============================================================================

/// Fixed conversation parameters that are not runtime-tunable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Lease TTL for one call
    pub call_lease_ttl: Duration,
    /// Lease TTL for schema-level work
    pub schema_lease_ttl: Duration,
    /// Graceful-shutdown drain window
    pub drain_deadline: Duration,
    /// Max sentences buffered ahead of the synthesizer
    pub max_buffered_sentences: usize,
    /// Sentence extraction overflow length
    pub max_sentence_chars: usize,
    /// Tool/turn iteration cap within one human turn
    pub max_turn_iterations: u32,
    /// Conflict reload-reapply attempts on save
    pub save_conflict_retries: u32,
    /// Completion token cap per conversational turn
    pub completion_max_tokens: u32,
    /// Pivot language LLM prompts are authored in
    pub pivot_language: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            call_lease_ttl: Duration::from_secs(60),
            schema_lease_ttl: Duration::from_secs(300),
            drain_deadline: Duration::from_secs(60),
            max_buffered_sentences: 8,
            max_sentence_chars: 120,
            max_turn_iterations: 3,
            save_conflict_retries: 3,
            // 100 tokens ~= 75 words; 160 covers six short sentences
            completion_max_tokens: 160,
            pivot_language: "en-US".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_defaults_match_table() {
        let flags = FeatureFlags::default();
        assert_eq!(flags.answer_hard_timeout_sec, 15);
        assert_eq!(flags.answer_soft_timeout_sec, 4);
        assert_eq!(flags.phone_silence_timeout_sec, 20);
        assert_eq!(flags.vad_silence_timeout_ms, 500);
        assert_eq!(flags.vad_cutoff_timeout_ms, 250);
        assert!(!flags.slow_llm_for_chat);
        assert!(!flags.recording_enabled);
    }

    #[test]
    fn test_chat_tier_from_flag() {
        let mut flags = FeatureFlags::default();
        assert_eq!(flags.chat_tier(), ModelTier::Fast);
        flags.slow_llm_for_chat = true;
        assert_eq!(flags.chat_tier(), ModelTier::Slow);
    }
}
