//! Thin bridges to the AI and messaging services the pipeline consumes.
//!
//! Each trait mirrors one external collaborator: translation, content
//! safety, vector search, and SMS delivery. Implementations are selected at
//! construction; the engine never knows which vendor is behind a trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use parlance_core::{MediaError, PhoneNumber};

/// Machine translation bridge.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` into `target_lang`; `source_lang` may be inferred.
    async fn translate(
        &self,
        text: &str,
        source_lang: Option<&str>,
        target_lang: &str,
    ) -> Result<String, MediaError>;
}

/// Verdict of a content-safety scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub allowed: bool,
    #[serde(default)]
    pub categories_matched: Vec<String>,
}

impl SafetyVerdict {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            categories_matched: Vec::new(),
        }
    }

    pub fn blocked(categories: Vec<String>) -> Self {
        Self {
            allowed: false,
            categories_matched: categories,
        }
    }
}

/// Content-safety bridge; every sentence passes through before synthesis.
#[async_trait]
pub trait ContentSafety: Send + Sync {
    async fn check(&self, text: &str) -> Result<SafetyVerdict, MediaError>;
}

/// One retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub snippet: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Vector search bridge backing `search_documents`.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, MediaError>;
}

/// Outbound SMS bridge.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &PhoneNumber, body: &str) -> Result<(), MediaError>;
}
