//! Queue-consuming worker.
//!
//! Pulls call and SMS events, runs one orchestration per call with its own
//! control channel and cancellation scope, extends queue visibility while
//! a call is in flight, and drains gracefully on shutdown so in-flight
//! calls resume on another worker from their last saved state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use parlance_core::{
    Call, CallId, CallInitiate, ConversationConfig, LeaseError, LlmSettings, Message,
    MessageAction, MessagePersona, ParlanceError, QueueName,
};
use parlance_engine::{
    CallOrchestrator, CancelScope, ControlEvent, Dispatcher, EngineMetrics, OrchestratorDeps,
    PromptAssembler, PromptSet, ResponsePipeline, ToolRegistry,
};
use parlance_llm::LlmDriver;
use parlance_media::SpeechRecognizer;
use parlance_store::{
    save_with_reapply, CallStore, FeatureClient, InboundEvent, KeyValueStore, LeaseManager,
    QueueEnvelope, QueueMessage, SmsEvent, WorkQueue,
};

use crate::config::{BotDefaults, WorkerConfig};
use crate::telemetry::METRICS;

/// Shared dependencies of the worker, wired once at startup.
pub struct WorkerContext {
    pub store: Arc<dyn CallStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub kv: Arc<dyn KeyValueStore>,
    pub features: Arc<FeatureClient>,
    pub driver: Arc<LlmDriver>,
    pub registry: Arc<ToolRegistry>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub pipeline: Arc<ResponsePipeline>,
    pub metrics: Arc<dyn EngineMetrics>,
    pub defaults: BotDefaults,
    pub llm_settings: LlmSettings,
    pub conversation: ConversationConfig,
    pub worker: WorkerConfig,
}

struct ActiveCall {
    control: mpsc::Sender<ControlEvent>,
    scope: CancelScope,
}

/// One worker instance; processes any number of concurrent calls, one
/// orchestration task each.
#[derive(Clone)]
pub struct Worker {
    ctx: Arc<WorkerContext>,
    active: Arc<Mutex<HashMap<CallId, ActiveCall>>>,
}

impl Worker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Poll the queues until shutdown flips, then drain.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("worker started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.ctx.worker.poll_interval) => {
                    self.poll_call_events().await;
                    self.poll_sms_events().await;
                }
            }
        }
        self.drain().await;
        tracing::info!("worker stopped");
    }

    async fn poll_call_events(&self) {
        let messages = match self
            .ctx
            .queue
            .receive(
                QueueName::CallEvents,
                self.ctx.worker.batch_size,
                self.ctx.worker.visibility,
            )
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "call_events receive failed");
                return;
            }
        };
        for message in messages {
            if let Err(e) = self.handle_call_event(message).await {
                tracing::warn!(error = %e, "call event handling failed");
                count_queue_message("call_events", "error");
            }
        }
    }

    async fn handle_call_event(&self, message: QueueMessage) -> Result<(), ParlanceError> {
        let envelope =
            QueueEnvelope::<InboundEvent>::from_json(QueueName::CallEvents, &message.payload)?;
        let fingerprint = envelope.fingerprint();
        match envelope.body {
            InboundEvent::IncomingCall { caller_phone, .. } => {
                let callback_window = chrono::Duration::hours(
                    self.ctx.features.flags().await.callback_timeout_hour as i64,
                );
                let existing = self.ctx.store.get_last(&caller_phone).await?;
                let call = match existing {
                    Some(call) if call.in_progress() => {
                        tracing::info!(
                            call_id = %call.call_id,
                            "caller already on an active call, dropping duplicate event"
                        );
                        self.ack(QueueName::CallEvents, message.receipt, "dup").await;
                        return Ok(());
                    }
                    // A fresh outbound record created by the API
                    Some(call) if call.messages.is_empty() => call,
                    // Calling back within the retention window resumes the
                    // conversation where it left off
                    Some(call)
                        if call.next.is_none()
                            && chrono::Utc::now() - call.updated_at < callback_window =>
                    {
                        tracing::info!(call_id = %call.call_id, "resuming recent call");
                        call
                    }
                    _ => {
                        let mut call = Call::new(self.initiate_for(&caller_phone));
                        self.ctx.store.save(&mut call).await?;
                        call
                    }
                };
                self.spawn_call(call, message.receipt);
                Ok(())
            }
            InboundEvent::MediaEvent {
                call_id,
                kind,
                payload,
            } => {
                self.handle_media_event(call_id, kind, payload, fingerprint)
                    .await;
                self.ack(QueueName::CallEvents, message.receipt, "ok").await;
                Ok(())
            }
        }
    }

    async fn handle_media_event(
        &self,
        call_id: CallId,
        kind: parlance_core::MediaEventKind,
        payload: Option<serde_json::Value>,
        fingerprint: String,
    ) {
        use parlance_core::MediaEventKind;
        match kind {
            MediaEventKind::Hangup | MediaEventKind::Transferred => {
                let control = {
                    let active = self.active.lock().unwrap();
                    active.get(&call_id).map(|entry| entry.control.clone())
                };
                match control {
                    Some(control) => {
                        let _ = control
                            .send(ControlEvent::Hangup {
                                fingerprint: Some(fingerprint),
                            })
                            .await;
                    }
                    None => {
                        tracing::debug!(%call_id, "hangup for a call this worker does not own");
                    }
                }
            }
            MediaEventKind::RecordingStarted => {
                let uri = payload
                    .as_ref()
                    .and_then(|p| p.get("uri"))
                    .and_then(|u| u.as_str())
                    .map(str::to_string);
                if let Some(uri) = uri {
                    let result = save_with_reapply(
                        self.ctx.store.as_ref(),
                        call_id,
                        self.ctx.conversation.save_conflict_retries,
                        move |call| call.recording_uri = Some(uri.clone()),
                    )
                    .await;
                    if let Err(e) = result {
                        tracing::warn!(%call_id, error = %e, "recording uri update failed");
                    }
                }
            }
            MediaEventKind::Connected | MediaEventKind::RecordingStopped => {
                tracing::debug!(%call_id, %kind, "media event noted");
            }
        }
    }

    async fn poll_sms_events(&self) {
        let messages = match self
            .ctx
            .queue
            .receive(
                QueueName::SmsEvents,
                self.ctx.worker.batch_size,
                self.ctx.worker.visibility,
            )
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "sms_events receive failed");
                return;
            }
        };
        for message in messages {
            if let Err(e) = self.handle_sms_event(message).await {
                tracing::warn!(error = %e, "sms event handling failed");
                count_queue_message("sms_events", "error");
            }
        }
    }

    async fn handle_sms_event(&self, message: QueueMessage) -> Result<(), ParlanceError> {
        let envelope =
            QueueEnvelope::<SmsEvent>::from_json(QueueName::SmsEvents, &message.payload)?;
        let fingerprint = envelope.fingerprint();
        let event = envelope.body;

        let existing = self.ctx.store.get_last(&event.from).await?;
        let forwarded = if let Some(call) = &existing {
            if call.in_progress() {
                let control = {
                    let active = self.active.lock().unwrap();
                    active.get(&call.call_id).map(|entry| entry.control.clone())
                };
                match control {
                    Some(control) => control
                        .send(ControlEvent::Sms {
                            event: event.clone(),
                            fingerprint: Some(fingerprint.clone()),
                        })
                        .await
                        .is_ok(),
                    None => false,
                }
            } else {
                false
            }
        } else {
            false
        };

        if !forwarded {
            // No active call here: record the exchange as an SMS-only Call
            let mut call = Call::new(self.initiate_for(&event.from));
            call.mark_event_processed(fingerprint);
            call.append_message(Message::new(
                MessagePersona::Human,
                MessageAction::Sms,
                event.body.clone(),
            ));
            self.ctx.store.save(&mut call).await?;
            tracing::info!(call_id = %call.call_id, "sms-only record created");
        }
        self.ack(QueueName::SmsEvents, message.receipt, "ok").await;
        Ok(())
    }

    /// Start one orchestration task plus its visibility extender.
    fn spawn_call(&self, call: Call, receipt: Uuid) {
        let call_id = call.call_id;
        let (control_tx, control_rx) = mpsc::channel(8);
        let scope = CancelScope::new();
        {
            let mut active = self.active.lock().unwrap();
            active.insert(
                call_id,
                ActiveCall {
                    control: control_tx,
                    scope: scope.clone(),
                },
            );
        }
        if let Ok(metrics) = METRICS.as_ref() {
            metrics.calls_started_total.inc();
            metrics.active_calls.inc();
        }

        // The queue message stays invisible while the call runs
        let extender = {
            let queue = self.ctx.queue.clone();
            let step = self.ctx.worker.visibility / 2;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(step).await;
                    if queue.extend(QueueName::CallEvents, receipt, step).await.is_err() {
                        break;
                    }
                }
            })
        };

        let worker = self.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let orchestrator = worker.build_orchestrator().await;
            let result = orchestrator.run_call(call, control_rx, scope).await;
            extender.abort();

            match &result {
                Ok(call) => {
                    tracing::info!(%call_id, version = call.version, "call finished");
                    worker.ack(QueueName::CallEvents, receipt, "ok").await;
                }
                Err(ParlanceError::Lease(LeaseError::Busy { .. })) => {
                    tracing::info!(%call_id, "call owned elsewhere");
                    worker.ack(QueueName::CallEvents, receipt, "dup").await;
                }
                Err(e) => {
                    tracing::error!(%call_id, error = %e, "call failed");
                    let _ = worker.ctx.queue.nack(QueueName::CallEvents, receipt).await;
                    count_queue_message("call_events", "error");
                }
            }

            let mut active = worker.active.lock().unwrap();
            active.remove(&call_id);
            drop(active);
            if let Ok(metrics) = METRICS.as_ref() {
                metrics.active_calls.dec();
                if result.is_ok() {
                    metrics.calls_closed_total.inc();
                    metrics
                        .call_duration_seconds
                        .observe(started.elapsed().as_secs_f64());
                }
            }
        });
    }

    /// One orchestrator per call, with a fresh feature-flag snapshot.
    async fn build_orchestrator(&self) -> CallOrchestrator {
        let flags = self.ctx.features.flags().await;
        CallOrchestrator::new(OrchestratorDeps {
            store: self.ctx.store.clone(),
            lease: LeaseManager::new(self.ctx.kv.clone()),
            driver: self.ctx.driver.clone(),
            registry: self.ctx.registry.clone(),
            recognizer: self.ctx.recognizer.clone(),
            pipeline: self.ctx.pipeline.clone(),
            assembler: PromptAssembler::new(
                self.ctx.llm_settings.fast.context_window,
                self.ctx.conversation.completion_max_tokens as usize,
            ),
            prompts: PromptSet::default(),
            dispatcher: Dispatcher::new(self.ctx.queue.clone(), self.ctx.kv.clone()),
            metrics: self.ctx.metrics.clone(),
            flags,
            config: self.ctx.conversation.clone(),
        })
    }

    fn initiate_for(&self, caller: &parlance_core::PhoneNumber) -> CallInitiate {
        let defaults = &self.ctx.defaults;
        CallInitiate {
            bot_name: defaults.bot_name.clone(),
            bot_company: defaults.bot_company.clone(),
            agent_phone_number: defaults.agent_phone_number.clone(),
            caller_phone_number: caller.clone(),
            language_default: defaults.language_default.clone(),
            languages_available: defaults.languages_available.clone(),
            task_description: defaults.task_description.clone(),
            claim_schema: Vec::new(),
            prompts_overrides: None,
        }
    }

    async fn ack(&self, queue: QueueName, receipt: Uuid, outcome: &str) {
        if let Err(e) = self.ctx.queue.ack(queue, receipt).await {
            tracing::debug!(error = %e, "ack failed (already redelivered?)");
        }
        count_queue_message(queue.as_db_str(), outcome);
    }

    /// Ask every active call to suspend, give them the drain window, then
    /// cancel whatever remains.
    async fn drain(&self) {
        let targets: Vec<(CallId, mpsc::Sender<ControlEvent>)> = {
            let active = self.active.lock().unwrap();
            active
                .iter()
                .map(|(id, entry)| (*id, entry.control.clone()))
                .collect()
        };
        tracing::info!(calls = targets.len(), "draining worker");
        for (_, control) in &targets {
            let _ = control.send(ControlEvent::Shutdown).await;
        }

        let deadline = Instant::now() + self.ctx.worker.drain_deadline;
        while Instant::now() < deadline {
            if self.active.lock().unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let remaining: Vec<CancelScope> = {
            let active = self.active.lock().unwrap();
            active.values().map(|entry| entry.scope.clone()).collect()
        };
        tracing::warn!(calls = remaining.len(), "drain deadline hit, cancelling");
        for scope in remaining {
            scope.cancel();
        }
    }
}

fn count_queue_message(queue: &str, outcome: &str) {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics
            .queue_messages_total
            .with_label_values(&[queue, outcome])
            .inc();
    }
}
