//! Post-call background dispatch.
//!
//! When a call closes, one `post_call` job (synthesis + SMS report) is
//! enqueued, plus one `training` job when the conversation produced new
//! knowledge worth extracting. Short-TTL markers in the key store make the
//! dispatch idempotent across redeliveries and worker restarts.

use std::sync::Arc;
use std::time::Duration;

use parlance_core::{Call, JobKind, ParlanceResult, QueueName};
use parlance_store::{JobEvent, KeyValueStore, QueueEnvelope, WorkQueue};

const DEDUP_TTL: Duration = Duration::from_secs(3600);

/// Enqueues follow-up jobs for closed calls.
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<dyn WorkQueue>,
    kv: Arc<dyn KeyValueStore>,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn WorkQueue>, kv: Arc<dyn KeyValueStore>) -> Self {
        Self { queue, kv }
    }

    /// Enqueue the post-call jobs for `call`, once per `(call, kind)`.
    pub async fn dispatch_post_call(&self, call: &Call) -> ParlanceResult<()> {
        self.enqueue_once(call, JobKind::PostCall, QueueName::PostCall)
            .await?;
        if produced_knowledge(call) {
            self.enqueue_once(call, JobKind::Training, QueueName::Training)
                .await?;
        }
        Ok(())
    }

    async fn enqueue_once(
        &self,
        call: &Call,
        kind: JobKind,
        queue: QueueName,
    ) -> ParlanceResult<()> {
        let marker = format!("dispatch:{}:{}", call.call_id, kind);
        if !self.kv.set_if_absent(&marker, "1", Some(DEDUP_TTL)).await {
            tracing::debug!(call_id = %call.call_id, %kind, "job already dispatched");
            return Ok(());
        }
        let envelope = QueueEnvelope::new(JobEvent {
            call_id: call.call_id,
            kind,
        });
        self.queue.send(queue, &envelope.to_json()?).await?;
        tracing::info!(call_id = %call.call_id, %kind, "post-call job enqueued");
        Ok(())
    }
}

/// Whether the conversation is worth a training extraction: it either
/// filled claim fields or consulted the document base.
fn produced_knowledge(call: &Call) -> bool {
    if !call.claim.is_empty() {
        return true;
    }
    call.messages.iter().any(|message| {
        message
            .tool_calls
            .iter()
            .any(|tool_call| tool_call.name == "search_documents")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlance_core::{
        CallInitiate, ClaimField, ClaimFieldType, LanguageEntry, PhoneNumber,
    };
    use parlance_store::{MemoryKeyValue, MemoryQueue};

    fn call() -> Call {
        Call::new(CallInitiate {
            bot_name: "Esperanza".to_string(),
            bot_company: "Contoso Insurance".to_string(),
            agent_phone_number: PhoneNumber::parse("+33699999999").unwrap(),
            caller_phone_number: PhoneNumber::parse("+33612345678").unwrap(),
            language_default: "fr-FR".to_string(),
            languages_available: vec![LanguageEntry::new(
                "fr-FR",
                "voice-fr",
                vec!["French".to_string()],
            )],
            task_description: "claims".to_string(),
            claim_schema: vec![ClaimField::new("policy_number", ClaimFieldType::Text)],
            prompts_overrides: None,
        })
    }

    fn dispatcher() -> (Dispatcher, Arc<MemoryQueue>) {
        let queue = Arc::new(MemoryQueue::new());
        (
            Dispatcher::new(queue.clone(), Arc::new(MemoryKeyValue::new())),
            queue,
        )
    }

    #[tokio::test]
    async fn test_post_call_enqueued_once() {
        let (dispatcher, queue) = dispatcher();
        let call = call();
        dispatcher.dispatch_post_call(&call).await.unwrap();
        dispatcher.dispatch_post_call(&call).await.unwrap();

        let jobs = queue
            .receive(QueueName::PostCall, 10, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        let envelope =
            QueueEnvelope::<JobEvent>::from_json(QueueName::PostCall, &jobs[0].payload).unwrap();
        assert_eq!(envelope.body.call_id, call.call_id);
        assert_eq!(envelope.body.kind, JobKind::PostCall);
    }

    #[tokio::test]
    async fn test_training_only_with_knowledge() {
        let (dispatcher, queue) = dispatcher();
        let quiet = call();
        dispatcher.dispatch_post_call(&quiet).await.unwrap();
        assert!(queue
            .receive(QueueName::Training, 10, Duration::from_secs(1))
            .await
            .unwrap()
            .is_empty());

        let mut informative = call();
        informative
            .set_claim_field("policy_number", "B01371946")
            .unwrap();
        dispatcher.dispatch_post_call(&informative).await.unwrap();
        let jobs = queue
            .receive(QueueName::Training, 10, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_two_calls_dispatch_independently() {
        let (dispatcher, queue) = dispatcher();
        dispatcher.dispatch_post_call(&call()).await.unwrap();
        dispatcher.dispatch_post_call(&call()).await.unwrap();
        let jobs = queue
            .receive(QueueName::PostCall, 10, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(jobs.len(), 2);
    }
}
