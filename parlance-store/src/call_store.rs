//! Call store with optimistic single-writer semantics.
//!
//! Documents are partitioned by caller phone number; `save` asserts the
//! version it loaded and bumps it on success. Readers outside the lease may
//! observe data stale by the backend's replication bound.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use parlance_core::{Call, CallId, PhoneNumber, StoreError};

/// Document store for Call entities.
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Load a call by its id.
    async fn get_by_id(&self, id: CallId) -> Result<Option<Call>, StoreError>;

    /// Most recent call for a caller, by creation time.
    async fn get_last(&self, phone_number: &PhoneNumber) -> Result<Option<Call>, StoreError>;

    /// Recent calls for a caller, newest first.
    async fn list_by_phone(
        &self,
        phone_number: &PhoneNumber,
        limit: usize,
    ) -> Result<Vec<Call>, StoreError>;

    /// Persist a call.
    ///
    /// Succeeds only when `call.version` equals the stored version; on
    /// success the call's `version` is bumped and `updated_at` refreshed in
    /// place. On `Conflict` the caller must reload, re-apply its delta, and
    /// retry.
    async fn save(&self, call: &mut Call) -> Result<(), StoreError>;
}

/// Save a delta with conflict reload-and-reapply.
///
/// Loads the call, applies `delta`, and saves; on `Conflict` the fresh
/// document is reloaded and the delta re-applied, up to `retries` times.
/// This is the write path for mutators that do not hold the call lease
/// (post-call enrichment, SMS append on an idle call).
pub async fn save_with_reapply<F>(
    store: &dyn CallStore,
    id: CallId,
    retries: u32,
    delta: F,
) -> Result<Call, StoreError>
where
    F: Fn(&mut Call),
{
    let mut attempt = 0;
    loop {
        let mut call = store
            .get_by_id(id)
            .await?
            .ok_or(StoreError::NotFound { id })?;
        delta(&mut call);
        match store.save(&mut call).await {
            Ok(()) => return Ok(call),
            Err(StoreError::Conflict { .. }) if attempt < retries => {
                attempt += 1;
                tracing::debug!(%id, attempt, "save conflict, reloading and re-applying");
            }
            Err(e) => return Err(e),
        }
    }
}

/// In-memory call store; the local deployment backend and the test double.
#[derive(Default)]
pub struct MemoryCallStore {
    partitions: RwLock<HashMap<String, Vec<Call>>>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn get_by_id(&self, id: CallId) -> Result<Option<Call>, StoreError> {
        let partitions = self.partitions.read().await;
        Ok(partitions
            .values()
            .flat_map(|calls| calls.iter())
            .find(|call| call.call_id == id)
            .cloned())
    }

    async fn get_last(&self, phone_number: &PhoneNumber) -> Result<Option<Call>, StoreError> {
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(phone_number.as_str())
            .and_then(|calls| calls.iter().max_by_key(|call| call.created_at))
            .cloned())
    }

    async fn list_by_phone(
        &self,
        phone_number: &PhoneNumber,
        limit: usize,
    ) -> Result<Vec<Call>, StoreError> {
        let partitions = self.partitions.read().await;
        let mut calls = partitions
            .get(phone_number.as_str())
            .cloned()
            .unwrap_or_default();
        calls.sort_by_key(|call| std::cmp::Reverse(call.created_at));
        calls.truncate(limit);
        Ok(calls)
    }

    async fn save(&self, call: &mut Call) -> Result<(), StoreError> {
        let partition = call.initiate.caller_phone_number.as_str().to_string();
        let mut partitions = self.partitions.write().await;
        let calls = partitions.entry(partition).or_default();

        match calls.iter_mut().find(|stored| stored.call_id == call.call_id) {
            Some(stored) => {
                if stored.version != call.version {
                    return Err(StoreError::Conflict {
                        id: call.call_id,
                        expected: call.version,
                        stored: stored.version,
                    });
                }
                call.version += 1;
                call.updated_at = Utc::now();
                *stored = call.clone();
            }
            None => {
                call.version += 1;
                call.updated_at = Utc::now();
                calls.push(call.clone());
            }
        }
        Ok(())
    }
}

/// Read-through cache layer over a call store.
///
/// Reads hit the key-value cache first; saves write through and refresh the
/// cached document so a colocated reader sees its own writes.
pub struct CachedCallStore<S> {
    inner: S,
    cache: Arc<dyn crate::KeyValueStore>,
    cache_ttl: Duration,
}

impl<S: CallStore> CachedCallStore<S> {
    pub fn new(inner: S, cache: Arc<dyn crate::KeyValueStore>, cache_ttl: Duration) -> Self {
        Self {
            inner,
            cache,
            cache_ttl,
        }
    }

    fn cache_key(id: CallId) -> String {
        format!("call_store:id:{id}")
    }
}

#[async_trait]
impl<S: CallStore> CallStore for CachedCallStore<S> {
    async fn get_by_id(&self, id: CallId) -> Result<Option<Call>, StoreError> {
        let key = Self::cache_key(id);
        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_str::<Call>(&cached) {
                Ok(call) => return Ok(Some(call)),
                Err(e) => {
                    tracing::debug!(error = %e, %id, "dropping unparsable cached call");
                    self.cache.delete(&key).await;
                }
            }
        }
        let call = self.inner.get_by_id(id).await?;
        if let Some(call) = &call {
            if let Ok(json) = serde_json::to_string(call) {
                self.cache.set(&key, &json, Some(self.cache_ttl)).await;
            }
        }
        Ok(call)
    }

    async fn get_last(&self, phone_number: &PhoneNumber) -> Result<Option<Call>, StoreError> {
        self.inner.get_last(phone_number).await
    }

    async fn list_by_phone(
        &self,
        phone_number: &PhoneNumber,
        limit: usize,
    ) -> Result<Vec<Call>, StoreError> {
        self.inner.list_by_phone(phone_number, limit).await
    }

    async fn save(&self, call: &mut Call) -> Result<(), StoreError> {
        self.inner.save(call).await?;
        let key = Self::cache_key(call.call_id);
        match serde_json::to_string(call) {
            Ok(json) => self.cache.set(&key, &json, Some(self.cache_ttl)).await,
            Err(_) => self.cache.delete(&key).await,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKeyValue;
    use parlance_core::{
        CallInitiate, ClaimField, ClaimFieldType, LanguageEntry, Message,
    };

    fn sample_call(phone: &str) -> Call {
        Call::new(CallInitiate {
            bot_name: "Esperanza".to_string(),
            bot_company: "Contoso Insurance".to_string(),
            agent_phone_number: PhoneNumber::parse("+33699999999").unwrap(),
            caller_phone_number: PhoneNumber::parse(phone).unwrap(),
            language_default: "fr-FR".to_string(),
            languages_available: vec![LanguageEntry::new(
                "fr-FR",
                "fr-FR-VivienneMultilingualNeural",
                vec!["French".to_string()],
            )],
            task_description: "claims intake".to_string(),
            claim_schema: vec![ClaimField::new("policy_number", ClaimFieldType::Text)],
            prompts_overrides: None,
        })
    }

    #[tokio::test]
    async fn test_save_assigns_versions() {
        let store = MemoryCallStore::new();
        let mut call = sample_call("+33612345678");
        assert_eq!(call.version, 0);
        store.save(&mut call).await.unwrap();
        assert_eq!(call.version, 1);
        store.save(&mut call).await.unwrap();
        assert_eq!(call.version, 2);
    }

    #[tokio::test]
    async fn test_save_conflict_on_stale_version() {
        let store = MemoryCallStore::new();
        let mut original = sample_call("+33612345678");
        store.save(&mut original).await.unwrap();

        // Two workers load the same version
        let mut a = store.get_by_id(original.call_id).await.unwrap().unwrap();
        let mut b = store.get_by_id(original.call_id).await.unwrap().unwrap();

        a.append_message(Message::human("from A"));
        store.save(&mut a).await.unwrap();

        b.append_message(Message::human("from B"));
        let err = store.save(&mut b).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        // Reload, re-apply, retry
        let mut fresh = store.get_by_id(original.call_id).await.unwrap().unwrap();
        fresh.append_message(Message::human("from B"));
        store.save(&mut fresh).await.unwrap();

        let stored = store.get_by_id(original.call_id).await.unwrap().unwrap();
        assert_eq!(stored.version, 3);
        let from_b: Vec<_> = stored
            .messages
            .iter()
            .filter(|m| m.content == "from B")
            .collect();
        assert_eq!(from_b.len(), 1);
    }

    #[tokio::test]
    async fn test_get_last_and_list() {
        let store = MemoryCallStore::new();
        let phone = PhoneNumber::parse("+33612345678").unwrap();
        let mut first = sample_call("+33612345678");
        store.save(&mut first).await.unwrap();
        let mut second = sample_call("+33612345678");
        second.created_at = first.created_at + chrono::Duration::seconds(10);
        store.save(&mut second).await.unwrap();
        let mut other = sample_call("+33700000000");
        store.save(&mut other).await.unwrap();

        let last = store.get_last(&phone).await.unwrap().unwrap();
        assert_eq!(last.call_id, second.call_id);

        let listed = store.list_by_phone(&phone, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].call_id, second.call_id);

        let capped = store.list_by_phone(&phone, 1).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn test_save_reload_round_trip() {
        let store = MemoryCallStore::new();
        let mut call = sample_call("+33612345678");
        call.append_message(Message::human("bonjour"));
        call.append_message(Message::human("j'ai un probleme"));
        store.save(&mut call).await.unwrap();

        let reloaded = store.get_by_id(call.call_id).await.unwrap().unwrap();
        assert_eq!(reloaded.messages, call.messages);
        assert_eq!(reloaded.version, call.version);
    }

    #[tokio::test]
    async fn test_save_with_reapply_keeps_both_deltas() {
        use parlance_core::{Reminder, ReminderOwner};

        let store = MemoryCallStore::new();
        let mut call = sample_call("+33612345678");
        store.save(&mut call).await.unwrap();
        let id = call.call_id;

        // Worker A saves its own change first
        let mut from_a = store.get_by_id(id).await.unwrap().unwrap();
        from_a.append_message(Message::human("from A"));
        store.save(&mut from_a).await.unwrap();

        // Worker B loaded the stale version; its reminder delta survives the
        // conflict exactly once
        let stale_version = call.version;
        let saved = save_with_reapply(&store, id, 3, |fresh| {
            fresh.reminders.push(Reminder::new(
                "Call back customer",
                "Get more details about the accident",
                chrono::Utc::now() + chrono::Duration::days(1),
                ReminderOwner::Assistant,
            ));
        })
        .await
        .unwrap();

        assert!(saved.version > stale_version);
        assert_eq!(saved.reminders.len(), 1);
        assert!(saved.messages.iter().any(|m| m.content == "from A"));

        let stored = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.reminders.len(), 1);
    }

    #[tokio::test]
    async fn test_cached_store_serves_reads_and_refreshes_on_save() {
        let cache = Arc::new(MemoryKeyValue::new());
        let store = CachedCallStore::new(
            MemoryCallStore::new(),
            cache.clone(),
            Duration::from_secs(60),
        );
        let mut call = sample_call("+33612345678");
        store.save(&mut call).await.unwrap();

        let hit = store.get_by_id(call.call_id).await.unwrap().unwrap();
        assert_eq!(hit.version, 1);

        call.append_message(Message::human("again"));
        store.save(&mut call).await.unwrap();
        let refreshed = store.get_by_id(call.call_id).await.unwrap().unwrap();
        assert_eq!(refreshed.version, 2);
        assert_eq!(refreshed.messages.len(), 1);
    }
}
