//! HTTP bridges to the media gateway and AI services.
//!
//! The gateway terminates SIP/media; this process only tells it what to
//! say, play, or send. Every bridge is a thin POST with the shared API key;
//! provider selection happens at construction and the engine only sees the
//! traits.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use parlance_core::{MediaError, PhoneNumber};
use parlance_media::{
    AmbientSound, ContentSafety, SafetyVerdict, SearchHit, SmsSender, SoundPlayer,
    SpeechSynthesizer, SynthesisDriver, SynthesisHandle, SynthesisOutcome, SynthesisRequest,
    Translator,
};

use crate::config::GatewayConfig;

/// Shared HTTP client for all gateway bridges.
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GatewayClient {
    pub fn new(config: &GatewayConfig) -> Arc<Self> {
        Arc::new(Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, MediaError> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| MediaError::Disconnected {
                reason: format!("{path}: {e}"),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Disconnected {
                reason: format!("{path}: HTTP {status}"),
            });
        }
        response.json().await.map_err(|e| MediaError::Disconnected {
            reason: format!("{path}: bad body: {e}"),
        })
    }

    async fn post_ok(&self, path: &str, body: serde_json::Value) -> Result<(), MediaError> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| MediaError::Disconnected {
                reason: format!("{path}: {e}"),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Disconnected {
                reason: format!("{path}: HTTP {status}"),
            });
        }
        Ok(())
    }
}

// ============================================================================
// SYNTHESIS
// ============================================================================

/// TTS through the gateway. `POST /tts` blocks until the audio has been
/// played to the caller, so handle completion tracks real flush; cancel
/// fires `POST /tts/cancel`, which drops the gateway's unplayed buffer.
pub struct GatewaySynthesizer {
    gateway: Arc<GatewayClient>,
}

impl GatewaySynthesizer {
    pub fn new(gateway: Arc<GatewayClient>) -> Arc<Self> {
        Arc::new(Self { gateway })
    }
}

#[async_trait]
impl SpeechSynthesizer for GatewaySynthesizer {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisHandle, MediaError> {
        let (handle, driver) = SynthesisHandle::channel();
        let gateway = self.gateway.clone();
        let utterance_id = Uuid::new_v4();
        tokio::spawn(play(gateway, utterance_id, request, driver));
        Ok(handle)
    }
}

async fn play(
    gateway: Arc<GatewayClient>,
    utterance_id: Uuid,
    request: SynthesisRequest,
    mut driver: SynthesisDriver,
) {
    let body = serde_json::json!({
        "id": utterance_id,
        "text": request.text,
        "voice": request.voice,
        "language": request.language,
        "style": request.style.as_db_str(),
        "speed": request.speed,
    });
    tokio::select! {
        result = gateway.post_ok("/tts", body) => {
            match result {
                Ok(()) => driver.finish(SynthesisOutcome::Completed),
                Err(e) => driver.finish(SynthesisOutcome::Failed(e)),
            }
        }
        _ = driver.cancelled() => {
            let cancel = serde_json::json!({ "id": utterance_id });
            if let Err(e) = gateway.post_ok("/tts/cancel", cancel).await {
                tracing::warn!(error = %e, "tts cancel failed");
            }
            driver.finish(SynthesisOutcome::Cancelled);
        }
    }
}

// ============================================================================
// SOUND
// ============================================================================

/// Ambient sound loops through the gateway.
pub struct GatewaySound {
    gateway: Arc<GatewayClient>,
}

impl GatewaySound {
    pub fn new(gateway: Arc<GatewayClient>) -> Arc<Self> {
        Arc::new(Self { gateway })
    }
}

#[async_trait]
impl SoundPlayer for GatewaySound {
    async fn play_loop(&self, sound: AmbientSound) -> Result<(), MediaError> {
        let name = match sound {
            AmbientSound::Loading => "loading",
            AmbientSound::NoiseFloor => "noise_floor",
        };
        self.gateway
            .post_ok("/sound", serde_json::json!({ "loop": name }))
            .await
    }

    async fn stop(&self) -> Result<(), MediaError> {
        self.gateway
            .post_ok("/sound/stop", serde_json::json!({}))
            .await
    }
}

// ============================================================================
// TRANSLATION / SAFETY / SEARCH / SMS
// ============================================================================

pub struct GatewayTranslator {
    gateway: Arc<GatewayClient>,
}

impl GatewayTranslator {
    pub fn new(gateway: Arc<GatewayClient>) -> Arc<Self> {
        Arc::new(Self { gateway })
    }
}

#[derive(Deserialize)]
struct TranslationBody {
    text: String,
}

#[async_trait]
impl Translator for GatewayTranslator {
    async fn translate(
        &self,
        text: &str,
        source_lang: Option<&str>,
        target_lang: &str,
    ) -> Result<String, MediaError> {
        let body: TranslationBody = self
            .gateway
            .post_json(
                "/translate",
                serde_json::json!({
                    "text": text,
                    "source_lang": source_lang,
                    "target_lang": target_lang,
                }),
            )
            .await?;
        Ok(body.text)
    }
}

pub struct GatewaySafety {
    gateway: Arc<GatewayClient>,
}

impl GatewaySafety {
    pub fn new(gateway: Arc<GatewayClient>) -> Arc<Self> {
        Arc::new(Self { gateway })
    }
}

#[async_trait]
impl ContentSafety for GatewaySafety {
    async fn check(&self, text: &str) -> Result<SafetyVerdict, MediaError> {
        self.gateway
            .post_json(
                "/safety",
                serde_json::json!({
                    "text": text,
                    "categories": ["hate", "violence", "self_harm", "sexual"],
                }),
            )
            .await
    }
}

pub struct GatewaySearch {
    gateway: Arc<GatewayClient>,
}

impl GatewaySearch {
    pub fn new(gateway: Arc<GatewayClient>) -> Arc<Self> {
        Arc::new(Self { gateway })
    }
}

#[derive(Deserialize)]
struct SearchBody {
    hits: Vec<SearchHit>,
}

#[async_trait]
impl parlance_media::VectorSearch for GatewaySearch {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, MediaError> {
        let body: SearchBody = self
            .gateway
            .post_json(
                "/search",
                serde_json::json!({ "query": query, "k": k }),
            )
            .await?;
        Ok(body.hits)
    }
}

pub struct GatewaySms {
    gateway: Arc<GatewayClient>,
}

impl GatewaySms {
    pub fn new(gateway: Arc<GatewayClient>) -> Arc<Self> {
        Arc::new(Self { gateway })
    }
}

#[async_trait]
impl SmsSender for GatewaySms {
    async fn send(&self, to: &PhoneNumber, body: &str) -> Result<(), MediaError> {
        self.gateway
            .post_ok(
                "/sms",
                serde_json::json!({ "to": to.as_str(), "body": body }),
            )
            .await
    }
}
