//! Runtime-tunable feature flags with bounded staleness.
//!
//! Values live in the key-value config store; reads go through a local
//! cache refreshed at most every `ttl`. A flipped flag reaches every worker
//! within one TTL and applies to subsequent turns, never the one in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use parlance_core::{feature_keys, FeatureFlags};

use crate::KeyValueStore;

struct CachedValue {
    value: Option<String>,
    fetched_at: Instant,
}

/// Reads feature flags from the config store with a TTL cache.
pub struct FeatureClient {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
    cache: Mutex<HashMap<&'static str, CachedValue>>,
}

impl FeatureClient {
    /// Default refresh bound of 60s.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self::with_ttl(kv, Duration::from_secs(60))
    }

    pub fn with_ttl(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self {
            kv,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Assemble a full snapshot; unset or unparsable keys fall back to the
    /// documented defaults.
    pub async fn flags(&self) -> FeatureFlags {
        let defaults = FeatureFlags::default();
        FeatureFlags {
            answer_hard_timeout_sec: self
                .get(feature_keys::ANSWER_HARD_TIMEOUT_SEC, defaults.answer_hard_timeout_sec)
                .await,
            answer_soft_timeout_sec: self
                .get(feature_keys::ANSWER_SOFT_TIMEOUT_SEC, defaults.answer_soft_timeout_sec)
                .await,
            callback_timeout_hour: self
                .get(feature_keys::CALLBACK_TIMEOUT_HOUR, defaults.callback_timeout_hour)
                .await,
            phone_silence_timeout_sec: self
                .get(
                    feature_keys::PHONE_SILENCE_TIMEOUT_SEC,
                    defaults.phone_silence_timeout_sec,
                )
                .await,
            recognition_retry_max: self
                .get(feature_keys::RECOGNITION_RETRY_MAX, defaults.recognition_retry_max)
                .await,
            recording_enabled: self
                .get(feature_keys::RECORDING_ENABLED, defaults.recording_enabled)
                .await,
            slow_llm_for_chat: self
                .get(feature_keys::SLOW_LLM_FOR_CHAT, defaults.slow_llm_for_chat)
                .await,
            vad_silence_timeout_ms: self
                .get(feature_keys::VAD_SILENCE_TIMEOUT_MS, defaults.vad_silence_timeout_ms)
                .await,
            vad_cutoff_timeout_ms: self
                .get(feature_keys::VAD_CUTOFF_TIMEOUT_MS, defaults.vad_cutoff_timeout_ms)
                .await,
            vad_threshold: self
                .get(feature_keys::VAD_THRESHOLD, defaults.vad_threshold)
                .await,
        }
    }

    async fn get<T: FromFeatureStr>(&self, key: &'static str, default: T) -> T {
        match self.raw(key).await {
            Some(raw) => T::parse_feature(&raw).unwrap_or(default),
            None => default,
        }
    }

    async fn raw(&self, key: &'static str) -> Option<String> {
        let now = Instant::now();
        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.get(key) {
                if now.duration_since(cached.fetched_at) < self.ttl {
                    return cached.value.clone();
                }
            }
        }
        let value = self.kv.get(&format!("features:{key}")).await;
        let mut cache = self.cache.lock().await;
        cache.insert(
            key,
            CachedValue {
                value: value.clone(),
                fetched_at: now,
            },
        );
        value
    }
}

/// Lenient parsing for flag values ("true"/"1" booleans, plain numbers).
trait FromFeatureStr: Sized {
    fn parse_feature(raw: &str) -> Option<Self>;
}

impl FromFeatureStr for bool {
    fn parse_feature(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        }
    }
}

impl FromFeatureStr for u32 {
    fn parse_feature(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }
}

impl FromFeatureStr for u64 {
    fn parse_feature(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }
}

impl FromFeatureStr for f64 {
    fn parse_feature(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKeyValue;

    #[tokio::test]
    async fn test_defaults_when_unset() {
        let client = FeatureClient::new(Arc::new(MemoryKeyValue::new()));
        let flags = client.flags().await;
        assert_eq!(flags, FeatureFlags::default());
    }

    #[tokio::test]
    async fn test_overrides_from_store() {
        let kv = Arc::new(MemoryKeyValue::new());
        kv.set("features:answer_hard_timeout_sec", "30", None).await;
        kv.set("features:slow_llm_for_chat", "true", None).await;
        kv.set("features:vad_threshold", "0.8", None).await;

        let client = FeatureClient::new(kv);
        let flags = client.flags().await;
        assert_eq!(flags.answer_hard_timeout_sec, 30);
        assert!(flags.slow_llm_for_chat);
        assert!((flags.vad_threshold - 0.8).abs() < f64::EPSILON);
        // Untouched keys keep their defaults
        assert_eq!(flags.answer_soft_timeout_sec, 4);
    }

    #[tokio::test]
    async fn test_staleness_is_bounded_by_ttl() {
        let kv = Arc::new(MemoryKeyValue::new());
        kv.set("features:phone_silence_timeout_sec", "20", None)
            .await;
        let client = FeatureClient::with_ttl(kv.clone(), Duration::from_millis(20));

        assert_eq!(client.flags().await.phone_silence_timeout_sec, 20);

        kv.set("features:phone_silence_timeout_sec", "40", None)
            .await;
        // Within the TTL the stale value may still be served
        assert_eq!(client.flags().await.phone_silence_timeout_sec, 20);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(client.flags().await.phone_silence_timeout_sec, 40);
    }

    #[tokio::test]
    async fn test_unparsable_values_fall_back() {
        let kv = Arc::new(MemoryKeyValue::new());
        kv.set("features:recognition_retry_max", "many", None).await;
        let client = FeatureClient::new(kv);
        assert_eq!(client.flags().await.recognition_retry_max, 3);
    }
}
