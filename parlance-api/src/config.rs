//! Environment-driven configuration.
//!
//! Every setting is read from `PARLANCE_*` variables with sensible local
//! defaults. Nested keys use the `__` separator, e.g.
//! `PARLANCE_LLM__FAST__ENDPOINT` or `PARLANCE_GATEWAY__BASE_URL`.

use std::time::Duration;

use parlance_core::{
    ConfigError, LanguageEntry, LlmSettings, LlmTierSettings, PhoneNumber,
};

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| default.to_string())
}

fn var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key).and_then(|raw| raw.parse().ok()).unwrap_or(default)
}

// ============================================================================
// API
// ============================================================================

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_host: String,
    pub port: u16,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self {
            bind_host: var_or("PARLANCE_API__BIND", "0.0.0.0"),
            port: var_parse("PARLANCE_API__PORT", 3000),
        }
    }
}

// ============================================================================
// LLM TIERS
// ============================================================================

/// Builds the two-tier LLM settings from the environment.
#[derive(Debug, Clone)]
pub struct LlmEnvConfig;

impl LlmEnvConfig {
    pub fn from_env() -> Result<LlmSettings, ConfigError> {
        Ok(LlmSettings {
            fast: Self::tier("FAST", "gpt-4o-mini", 16_000)?,
            slow: Self::tier("SLOW", "gpt-4o", 128_000)?,
        })
    }

    fn tier(
        name: &str,
        default_model: &str,
        default_context: usize,
    ) -> Result<LlmTierSettings, ConfigError> {
        let prefix = format!("PARLANCE_LLM__{name}");
        let api_key = var(&format!("{prefix}__API_KEY"))
            .or_else(|| var("PARLANCE_LLM__API_KEY"))
            .ok_or_else(|| ConfigError::MissingRequired {
                field: format!("{prefix}__API_KEY"),
            })?;
        Ok(LlmTierSettings {
            endpoint: var_or(&format!("{prefix}__ENDPOINT"), "https://api.openai.com/v1"),
            api_key,
            model: var_or(&format!("{prefix}__MODEL"), default_model),
            context_window: var_parse(&format!("{prefix}__CONTEXT_WINDOW"), default_context),
            streaming: var_parse(&format!("{prefix}__STREAMING"), true),
        })
    }
}

// ============================================================================
// MEDIA GATEWAY
// ============================================================================

/// Where the telephony/media gateway and the AI services live.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the media gateway (TTS, sound, translation, safety,
    /// search, SMS endpoints live under it)
    pub base_url: String,
    pub api_key: String,
    /// WebSocket endpoint of the streaming recognizer
    pub stt_endpoint: String,
    pub stt_api_key: String,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let api_key = var_or("PARLANCE_GATEWAY__API_KEY", "dev");
        Self {
            base_url: var_or("PARLANCE_GATEWAY__BASE_URL", "http://localhost:8080"),
            stt_endpoint: var_or(
                "PARLANCE_GATEWAY__STT_ENDPOINT",
                "ws://localhost:8080/stt",
            ),
            stt_api_key: var_or("PARLANCE_GATEWAY__STT_API_KEY", &api_key),
            api_key,
        }
    }
}

// ============================================================================
// WORKER
// ============================================================================

/// Queue consumption settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub visibility: Duration,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub drain_deadline: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self {
            visibility: Duration::from_secs(var_parse("PARLANCE_WORKER__VISIBILITY_SEC", 60)),
            batch_size: var_parse("PARLANCE_WORKER__BATCH_SIZE", 10),
            poll_interval: Duration::from_millis(var_parse(
                "PARLANCE_WORKER__POLL_INTERVAL_MS",
                200,
            )),
            drain_deadline: Duration::from_secs(var_parse(
                "PARLANCE_WORKER__DRAIN_DEADLINE_SEC",
                60,
            )),
        }
    }
}

// ============================================================================
// BOT DEFAULTS
// ============================================================================

/// Defaults applied to calls created without explicit overrides.
#[derive(Debug, Clone)]
pub struct BotDefaults {
    pub bot_name: String,
    pub bot_company: String,
    pub agent_phone_number: PhoneNumber,
    pub language_default: String,
    pub languages_available: Vec<LanguageEntry>,
    pub task_description: String,
}

impl BotDefaults {
    pub fn from_env() -> Result<Self, ConfigError> {
        let agent = var_or("PARLANCE_BOT__AGENT_PHONE_NUMBER", "+33999999999");
        let agent_phone_number =
            PhoneNumber::parse(&agent).map_err(|e| ConfigError::InvalidValue {
                field: "PARLANCE_BOT__AGENT_PHONE_NUMBER".to_string(),
                value: agent.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            bot_name: var_or("PARLANCE_BOT__NAME", "Esperanza"),
            bot_company: var_or("PARLANCE_BOT__COMPANY", "Contoso Insurance"),
            agent_phone_number,
            language_default: var_or("PARLANCE_BOT__LANGUAGE", "fr-FR"),
            languages_available: default_languages(),
            task_description: var_or(
                "PARLANCE_BOT__TASK",
                "Helping the customer file an insurance claim. Collect every field \
                 relevant to the case; the conversation is over when all the data has \
                 been gathered.",
            ),
        })
    }
}

/// Supported languages with their synthesis voices.
pub fn default_languages() -> Vec<LanguageEntry> {
    vec![
        LanguageEntry::new(
            "fr-FR",
            "fr-FR-VivienneMultilingualNeural",
            vec!["French".to_string(), "FR".to_string(), "France".to_string()],
        ),
        LanguageEntry::new(
            "en-US",
            "en-US-ShimmerTurboMultilingualNeural",
            vec![
                "English".to_string(),
                "EN".to_string(),
                "United States".to_string(),
            ],
        ),
        LanguageEntry::new(
            "es-ES",
            "es-ES-ArabellaMultilingualNeural",
            vec!["Spanish".to_string(), "ES".to_string(), "Spain".to_string()],
        ),
        LanguageEntry::new(
            "zh-CN",
            "zh-CN-XiaoyuMultilingualNeural",
            vec!["Chinese".to_string(), "ZH".to_string(), "China".to_string()],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_defaults() {
        let config = WorkerConfig::from_env();
        assert_eq!(config.visibility, Duration::from_secs(60));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.drain_deadline, Duration::from_secs(60));
    }

    #[test]
    fn test_default_languages_have_voices() {
        for language in default_languages() {
            assert!(!language.voice.is_empty());
            assert!(!language.pronunciations_en.is_empty());
        }
    }
}
