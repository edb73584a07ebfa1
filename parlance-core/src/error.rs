//! Error types for PARLANCE operations

use std::time::Duration;
use thiserror::Error;

use crate::{CallId, QueueName};

/// Call store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Call not found: {id}")]
    NotFound { id: CallId },

    #[error("Version conflict saving call {id}: expected {expected}, stored {stored}")]
    Conflict {
        id: CallId,
        expected: u64,
        stored: u64,
    },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Transient store failure: {reason}")]
    Transient { reason: String },
}

/// Distributed lease errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LeaseError {
    #[error("Lease busy: {key} held by another worker")]
    Busy { key: String },

    #[error("Lease lost: {key}")]
    Lost { key: String },

    #[error("Transient lease-store failure: {reason}")]
    Transient { reason: String },
}

/// Work queue errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Unknown receipt handle on queue {queue}")]
    UnknownReceipt { queue: QueueName },

    #[error("Malformed payload on queue {queue}: {reason}")]
    MalformedPayload { queue: QueueName, reason: String },

    #[error("Transient queue failure: {reason}")]
    Transient { reason: String },
}

/// LLM driver errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("Request to {tier} tier failed with status {status}: {message}")]
    RequestFailed {
        tier: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {tier} tier")]
    RateLimited { tier: String },

    #[error("Invalid response from {tier} tier: {reason}")]
    InvalidResponse { tier: String, reason: String },

    #[error("Completion truncated at the token limit")]
    MaxTokens,

    #[error("Content safety check rejected the exchange: {reason}")]
    SafetyCheck { reason: String },

    #[error("Completion produced no content and no tool calls")]
    EmptyCompletion,

    #[error("Completion cancelled")]
    Cancelled,
}

/// Media bridge (STT/TTS/sound) errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("Speech transport disconnected: {reason}")]
    Disconnected { reason: String },

    #[error("Synthesis failed: {reason}")]
    SynthesisFailed { reason: String },

    #[error("Recognition failed: {reason}")]
    RecognitionFailed { reason: String },

    #[error("Media operation cancelled")]
    Cancelled,
}

/// Tool registry and dispatch errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments for {name}: {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("Tool {name} failed: {reason}")]
    ExecutionFailed { name: String, reason: String },
}

/// Validation errors on entity mutation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown claim field: {field}")]
    UnknownClaimField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Language not available: {short_code}")]
    LanguageNotAvailable { short_code: String },

    #[error("Field {field} is already set")]
    AlreadySet { field: &'static str },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Top-level error type wrapping all subsystems.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParlanceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Call failed fatally: {reason}")]
    FatalCall { reason: String },

    #[error("Worker failed fatally: {reason}")]
    FatalWorker { reason: String },
}

impl ParlanceError {
    /// Whether the §7 policy allows retrying the failed operation with
    /// backoff. Conflicts have their own reload-and-reapply policy and are
    /// not transient in this sense.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(StoreError::Transient { .. })
            | Self::Lease(LeaseError::Transient { .. })
            | Self::Queue(QueueError::Transient { .. })
            | Self::Llm(LlmError::RequestFailed { .. })
            | Self::Llm(LlmError::RateLimited { .. })
            | Self::Llm(LlmError::InvalidResponse { .. })
            | Self::Llm(LlmError::EmptyCompletion)
            | Self::Llm(LlmError::MaxTokens)
            | Self::Media(MediaError::Disconnected { .. })
            | Self::Timeout(_) => true,
            _ => false,
        }
    }

    /// Whether the current call must be abandoned.
    pub fn is_fatal_for_call(&self) -> bool {
        matches!(
            self,
            Self::FatalCall { .. } | Self::Lease(LeaseError::Lost { .. })
        )
    }
}

/// Result alias used across the workspace.
pub type ParlanceResult<T> = Result<T, ParlanceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityIdType;

    #[test]
    fn test_transient_classification() {
        assert!(ParlanceError::from(StoreError::Transient {
            reason: "socket".to_string()
        })
        .is_transient());
        assert!(ParlanceError::from(LlmError::RateLimited {
            tier: "fast".to_string()
        })
        .is_transient());
        assert!(!ParlanceError::from(StoreError::Conflict {
            id: CallId::nil(),
            expected: 1,
            stored: 2
        })
        .is_transient());
        assert!(!ParlanceError::from(LlmError::SafetyCheck {
            reason: "blocked".to_string()
        })
        .is_transient());
    }

    #[test]
    fn test_lease_lost_is_fatal_for_call() {
        let err = ParlanceError::from(LeaseError::Lost {
            key: "call:xyz".to_string(),
        });
        assert!(err.is_fatal_for_call());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = StoreError::Conflict {
            id: CallId::nil(),
            expected: 7,
            stored: 8,
        };
        let text = err.to_string();
        assert!(text.contains("expected 7"));
        assert!(text.contains("stored 8"));
    }
}
