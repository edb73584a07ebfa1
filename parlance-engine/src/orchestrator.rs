//! Per-call orchestrator.
//!
//! One actor owns the Call: sub-tasks (STT pump, completion stream, speech
//! emitter, lease keeper) communicate with it over channels and never hold
//! a reference back. The state machine runs Greeting → Listening → Thinking
//! → Speaking → Listening until a hangup, an end-of-call tool, or the
//! silence ladder closes the call, then persists, dispatches follow-up
//! jobs, and releases the lease.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};

use parlance_core::{
    Call, ConversationConfig, FeatureFlags, LeaseError, LlmError, Message, MessageAction,
    MessagePersona, MessageStyle, NextAction, NextStep, ParlanceError, ParlanceResult,
    StoreError, ToolCall,
};
use parlance_llm::{CompletionRequest, LlmDriver};
use parlance_media::{
    RecognitionEvent, SearchHit, SpeechRecognizer, TurnConfig, TurnDetector, TurnEvent,
};
use parlance_store::{lease_key_call, CallStore, LeaseKeeper, LeaseManager, SmsEvent};

use crate::pipeline::{PipelineConfig, ResponsePipeline, TurnFinish, VoiceParams};
use crate::{
    CancelScope, Dispatcher, EngineMetrics, Incident, PromptAssembler, PromptSet, ToolControl,
    ToolRegistry, TurnContext,
};

/// Observable state of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Greeting,
    Listening,
    Thinking,
    Speaking,
    Ending,
    Closed,
}

/// Control events the worker forwards into an active call.
#[derive(Debug)]
pub enum ControlEvent {
    /// Telephony reported the far end hung up
    Hangup { fingerprint: Option<String> },
    /// SMS arrived from the caller mid-call
    Sms {
        event: SmsEvent,
        fingerprint: Option<String>,
    },
    /// Graceful drain: save and release so another worker resumes
    Shutdown,
}

/// Why the call is ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    Hangup,
    EndCallTool,
    Transfer,
    Silence,
}

/// What one turn cycle decided.
enum CycleOutcome {
    /// Back to Listening
    Continue,
    /// Close the call
    End(EndReason),
    /// The `new_claim` tool fired: finalize this Call, start a fresh one
    NewCall,
}

/// Everything a call run needs, wired once per worker.
pub struct OrchestratorDeps {
    pub store: Arc<dyn CallStore>,
    pub lease: LeaseManager,
    pub driver: Arc<LlmDriver>,
    pub registry: Arc<ToolRegistry>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub pipeline: Arc<ResponsePipeline>,
    pub assembler: PromptAssembler,
    pub prompts: PromptSet,
    pub dispatcher: Dispatcher,
    pub metrics: Arc<dyn EngineMetrics>,
    /// Flags snapshot taken at call start; later refreshes apply to later
    /// calls, never the one in progress
    pub flags: FeatureFlags,
    pub config: ConversationConfig,
}

/// The per-call state machine.
pub struct CallOrchestrator {
    deps: OrchestratorDeps,
}

impl CallOrchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self { deps }
    }

    /// Drive one call to completion. Returns the final Call, or the error
    /// that tore the call scope down.
    pub async fn run_call(
        &self,
        mut call: Call,
        mut control: mpsc::Receiver<ControlEvent>,
        scope: CancelScope,
    ) -> ParlanceResult<Call> {
        let mut state = CallState::Idle;

        // Exclusive ownership before any mutation
        let mut lease = self
            .deps
            .lease
            .acquire(&lease_key_call(call.call_id), self.deps.config.call_lease_ttl)
            .await?;
        let mut keeper = LeaseKeeper::spawn(self.deps.lease.clone(), lease.clone());
        let mut lease_lost = keeper.lost();

        let prompts = self
            .deps
            .prompts
            .clone()
            .with_overrides(call.initiate.prompts_overrides.as_ref());

        transition(&mut state, CallState::Greeting, call.call_id);
        if !call.in_progress() {
            call.append_message(Message::new(MessagePersona::Human, MessageAction::Call, ""));
        }
        call.recognition_retry = 0;
        self.save_call(&mut call).await?;

        let mut stt_rx = self
            .deps
            .recognizer
            .start(&call.language().short_code)
            .await?;
        let mut detector = TurnDetector::new(turn_config(&self.deps.flags));

        let hello = prompts.render(&prompts.hello, &call);
        self.speak_stored(&mut call, &hello, MessageStyle::Cheerful).await;
        self.save_call(&mut call).await?;

        transition(&mut state, CallState::Listening, call.call_id);
        let end_reason = loop {
            let deadline = tokio::time::Instant::from_std(detector.next_deadline());
            tokio::select! {
                changed = lease_lost.changed() => {
                    if changed.is_err() || *lease_lost.borrow() {
                        scope.cancel();
                        keeper.stop();
                        return Err(LeaseError::Lost {
                            key: lease.key.clone(),
                        }
                        .into());
                    }
                }
                maybe_ctrl = control.recv() => {
                    match maybe_ctrl {
                        Some(ControlEvent::Hangup { fingerprint }) => {
                            if self.is_duplicate(&mut call, fingerprint) {
                                continue;
                            }
                            break EndReason::Hangup;
                        }
                        Some(ControlEvent::Sms { event, fingerprint }) => {
                            if self.is_duplicate(&mut call, fingerprint) {
                                continue;
                            }
                            self.handle_inbound_sms(&mut call, event, &prompts).await?;
                        }
                        Some(ControlEvent::Shutdown) | None => {
                            return self
                                .suspend_call(call, &lease, keeper, state)
                                .await;
                        }
                    }
                }
                maybe_event = stt_rx.recv() => {
                    let Some(event) = maybe_event else {
                        // Recognition transport is gone for good
                        self.deps.metrics.on_incident(Incident::MediaUnreachable);
                        break EndReason::Silence;
                    };
                    if let Some(turn_event) = detector.on_event(&event) {
                        match self
                            .handle_turn_event(
                                turn_event,
                                &mut call,
                                &mut state,
                                &mut detector,
                                &mut stt_rx,
                                &mut lease_lost,
                                &scope,
                                &prompts,
                            )
                            .await?
                        {
                            CycleOutcome::Continue => {}
                            CycleOutcome::End(reason) => break reason,
                            CycleOutcome::NewCall => {
                                call = self.begin_new_claim(&mut call).await?;
                                self.deps.lease.release(&lease).await;
                                keeper.stop();
                                lease = self
                                    .deps
                                    .lease
                                    .acquire(
                                        &lease_key_call(call.call_id),
                                        self.deps.config.call_lease_ttl,
                                    )
                                    .await?;
                                keeper = LeaseKeeper::spawn(self.deps.lease.clone(), lease.clone());
                                lease_lost = keeper.lost();
                            }
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    if let Some(turn_event) = detector.poll(Instant::now()) {
                        match self
                            .handle_turn_event(
                                turn_event,
                                &mut call,
                                &mut state,
                                &mut detector,
                                &mut stt_rx,
                                &mut lease_lost,
                                &scope,
                                &prompts,
                            )
                            .await?
                        {
                            CycleOutcome::Continue => {}
                            CycleOutcome::End(reason) => break reason,
                            CycleOutcome::NewCall => {
                                call = self.begin_new_claim(&mut call).await?;
                                self.deps.lease.release(&lease).await;
                                keeper.stop();
                                lease = self
                                    .deps
                                    .lease
                                    .acquire(
                                        &lease_key_call(call.call_id),
                                        self.deps.config.call_lease_ttl,
                                    )
                                    .await?;
                                keeper = LeaseKeeper::spawn(self.deps.lease.clone(), lease.clone());
                                lease_lost = keeper.lost();
                            }
                        }
                    }
                }
                _ = scope.cancelled() => {
                    return self.suspend_call(call, &lease, keeper, state).await;
                }
            }
        };

        transition(&mut state, CallState::Ending, call.call_id);
        match end_reason {
            EndReason::Hangup => {}
            EndReason::EndCallTool => {
                let goodbye = prompts.render(&prompts.goodbye, &call);
                self.speak_stored(&mut call, &goodbye, MessageStyle::None).await;
            }
            EndReason::Transfer => {
                let transfer = prompts.render(&prompts.transfer_coming, &call);
                self.speak_stored(&mut call, &transfer, MessageStyle::None).await;
                call.append_message(Message::new(
                    MessagePersona::Assistant,
                    MessageAction::Transfer,
                    "",
                ));
            }
            EndReason::Silence => {
                let goodbye = prompts.render(&prompts.goodbye, &call);
                self.speak_stored(&mut call, &goodbye, MessageStyle::None).await;
                if call
                    .set_next(NextStep {
                        action: NextAction::Silence,
                        justification: "caller stayed silent through every re-engagement"
                            .to_string(),
                    })
                    .is_err()
                {
                    tracing::debug!(call_id = %call.call_id, "next action already recorded");
                }
            }
        }
        call.append_message(Message::new(
            MessagePersona::Human,
            MessageAction::Hangup,
            "",
        ));

        transition(&mut state, CallState::Closed, call.call_id);
        self.deps.recognizer.stop().await;
        self.save_call(&mut call).await?;
        self.deps.dispatcher.dispatch_post_call(&call).await?;
        self.deps.lease.release(&lease).await;
        keeper.stop();
        Ok(call)
    }

    /// Graceful drain: persist, release, let another worker resume.
    async fn suspend_call(
        &self,
        mut call: Call,
        lease: &parlance_store::Lease,
        keeper: LeaseKeeper,
        state: CallState,
    ) -> ParlanceResult<Call> {
        tracing::info!(call_id = %call.call_id, ?state, "suspending call for drain");
        self.deps.recognizer.stop().await;
        self.save_call(&mut call).await?;
        self.deps.lease.release(lease).await;
        keeper.stop();
        Ok(call)
    }

    fn is_duplicate(&self, call: &mut Call, fingerprint: Option<String>) -> bool {
        match fingerprint {
            Some(fingerprint) => {
                let fresh = call.mark_event_processed(fingerprint.clone());
                if !fresh {
                    tracing::info!(call_id = %call.call_id, %fingerprint, "duplicate event ignored");
                }
                !fresh
            }
            None => false,
        }
    }

    async fn handle_inbound_sms(
        &self,
        call: &mut Call,
        event: SmsEvent,
        prompts: &PromptSet,
    ) -> ParlanceResult<()> {
        // Silent append with a brief cue; the model sees it next turn
        call.append_message(Message::new(
            MessagePersona::Human,
            MessageAction::Sms,
            event.body,
        ));
        self.save_call(call).await?;
        let cue = prompts.render(&prompts.sms_received, call);
        self.speak_unstored(call, &cue).await;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_turn_event(
        &self,
        turn_event: TurnEvent,
        call: &mut Call,
        state: &mut CallState,
        detector: &mut TurnDetector,
        stt_rx: &mut mpsc::Receiver<RecognitionEvent>,
        lease_lost: &mut watch::Receiver<bool>,
        scope: &CancelScope,
        prompts: &PromptSet,
    ) -> ParlanceResult<CycleOutcome> {
        match turn_event {
            TurnEvent::TurnEnded { text } => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    return Ok(CycleOutcome::Continue);
                }
                call.recognition_retry = 0;
                call.append_message(Message::human(text));
                transition(state, CallState::Thinking, call.call_id);
                let outcome = self
                    .run_turn_cycle(call, detector, stt_rx, lease_lost, scope, prompts, state)
                    .await?;
                transition(state, CallState::Listening, call.call_id);
                Ok(outcome)
            }
            TurnEvent::IdleWarn => {
                call.recognition_retry += 1;
                if call.recognition_retry > self.deps.flags.recognition_retry_max {
                    tracing::info!(
                        call_id = %call.call_id,
                        retries = call.recognition_retry,
                        "silence ladder exhausted"
                    );
                    return Ok(CycleOutcome::End(EndReason::Silence));
                }
                self.save_call(call).await?;
                let cue = prompts.render(&prompts.re_engage, call);
                self.speak_unstored(call, &cue).await;
                Ok(CycleOutcome::Continue)
            }
            // Barge-in outside Speaking has nothing to cancel
            TurnEvent::BargeIn => Ok(CycleOutcome::Continue),
        }
    }

    /// One Thinking/Speaking cycle: completions and tool dispatch until the
    /// model answers without tools, the iteration budget runs out, or a
    /// tool ends the call.
    #[allow(clippy::too_many_arguments)]
    async fn run_turn_cycle(
        &self,
        call: &mut Call,
        detector: &mut TurnDetector,
        stt_rx: &mut mpsc::Receiver<RecognitionEvent>,
        lease_lost: &mut watch::Receiver<bool>,
        scope: &CancelScope,
        prompts: &PromptSet,
        state: &mut CallState,
    ) -> ParlanceResult<CycleOutcome> {
        let mut iterations = self.deps.config.max_turn_iterations;
        let mut rag_hits: Vec<SearchHit> = Vec::new();
        let mut style = MessageStyle::None;

        loop {
            let use_tools = iterations > 0;
            let tools = if use_tools {
                self.deps.registry.specs(call)
            } else {
                tracing::warn!(call_id = %call.call_id, "tools disabled for this completion");
                Vec::new()
            };
            let ctx = TurnContext {
                today: None,
                rag_hits: rag_hits.clone(),
            };
            let messages = self.deps.assembler.assemble(call, &ctx, &tools);
            let request = CompletionRequest::new(messages)
                .with_tools(tools)
                .with_max_tokens(self.deps.config.completion_max_tokens);

            let stream = match self
                .deps
                .driver
                .open_stream(self.deps.flags.chat_tier(), &request)
                .await
            {
                Ok(stream) => stream,
                Err(LlmError::SafetyCheck { reason }) => {
                    tracing::warn!(%reason, "prompt rejected by safety, dropping last input");
                    call.remove_last_human_message();
                    self.apologize(call, prompts).await?;
                    return Ok(CycleOutcome::Continue);
                }
                Err(e) => {
                    if iterations > 0 {
                        iterations -= 1;
                        tracing::warn!(error = %e, remaining = iterations, "completion failed, retrying turn");
                        continue;
                    }
                    self.apologize(call, prompts).await?;
                    return Ok(CycleOutcome::Continue);
                }
            };

            let (barge_tx, barge_rx) = watch::channel(false);
            let (speaking_tx, mut speaking_rx) = watch::channel(false);
            let voice = voice_params(call);
            let pipeline_config = self.pipeline_config(call, prompts);
            let run_fut = self.deps.pipeline.run(
                stream,
                style,
                voice.clone(),
                pipeline_config,
                barge_rx,
                speaking_tx,
                scope,
            );
            tokio::pin!(run_fut);

            // Keep the detector fed while the reply streams out; a barge-in
            // flips the watch and the pipeline cancels itself
            let mut stt_closed = false;
            let output = loop {
                tokio::select! {
                    output = &mut run_fut => break output,
                    maybe_event = stt_rx.recv(), if !stt_closed => {
                        match maybe_event {
                            Some(event) => {
                                if let Some(TurnEvent::BargeIn) = detector.on_event(&event) {
                                    tracing::info!(call_id = %call.call_id, "barge-in detected");
                                    let _ = barge_tx.send(true);
                                }
                            }
                            None => stt_closed = true,
                        }
                    }
                    changed = speaking_rx.changed() => {
                        if changed.is_ok() {
                            let speaking = *speaking_rx.borrow();
                            detector.set_speaking(speaking);
                            if speaking {
                                transition(state, CallState::Speaking, call.call_id);
                            }
                        }
                    }
                    changed = lease_lost.changed() => {
                        if changed.is_err() || *lease_lost.borrow() {
                            // In-flight speech may finish; no further saves
                            scope.cancel();
                        }
                    }
                }
            };
            detector.set_speaking(false);
            if *lease_lost.borrow() {
                return Err(ParlanceError::Lease(LeaseError::Lost {
                    key: lease_key_call(call.call_id),
                }));
            }
            style = output.style;

            if output.filtered {
                call.append_message(Message::new(
                    MessagePersona::System,
                    MessageAction::Note,
                    "one sentence was withheld by the content filter",
                ));
            }

            match output.finish {
                TurnFinish::Safety => {
                    call.remove_last_human_message();
                    self.apologize(call, prompts).await?;
                    return Ok(CycleOutcome::Continue);
                }
                TurnFinish::Error(e) => {
                    if iterations > 0 {
                        iterations -= 1;
                        tracing::warn!(error = %e, remaining = iterations, "turn failed, retrying");
                        continue;
                    }
                    self.apologize(call, prompts).await?;
                    return Ok(CycleOutcome::Continue);
                }
                TurnFinish::HardTimeout => {
                    self.deps.metrics.on_incident(Incident::HardTimeout);
                    tracing::warn!(call_id = %call.call_id, "hard answer timeout, aborting turn");
                    if !output.spoken_text.trim().is_empty() {
                        call.commit_assistant_turn(output.spoken_text, style, Vec::new());
                    }
                    self.apologize(call, prompts).await?;
                    return Ok(CycleOutcome::Continue);
                }
                TurnFinish::BargedIn => {
                    // Keep what was actually said; the interrupted tail and
                    // any half-assembled tool calls are discarded
                    if !output.spoken_text.trim().is_empty() {
                        call.commit_assistant_turn(output.spoken_text, style, Vec::new());
                    }
                    self.save_call(call).await?;
                    return Ok(CycleOutcome::Continue);
                }
                finish @ (TurnFinish::Completed | TurnFinish::MaxTokens) => {
                    let is_empty =
                        output.spoken_text.trim().is_empty() && output.tool_calls.is_empty();
                    if is_empty {
                        if iterations > 0 {
                            iterations -= 1;
                            tracing::warn!("empty completion, retrying");
                            continue;
                        }
                        self.apologize(call, prompts).await?;
                        return Ok(CycleOutcome::Continue);
                    }

                    let (executed, control_flow) = self
                        .dispatch_tools(call, output.tool_calls, style, &mut rag_hits)
                        .await;
                    let had_tools = !executed.is_empty();
                    call.commit_assistant_turn(output.spoken_text, style, executed);
                    self.save_call(call).await?;

                    match control_flow {
                        ToolControl::EndCall => {
                            return Ok(CycleOutcome::End(EndReason::EndCallTool))
                        }
                        ToolControl::TransferToAgent => {
                            return Ok(CycleOutcome::End(EndReason::Transfer))
                        }
                        ToolControl::NewClaim => return Ok(CycleOutcome::NewCall),
                        ToolControl::Continue => {}
                    }

                    if had_tools || finish == TurnFinish::MaxTokens {
                        if iterations == 0 {
                            return Ok(CycleOutcome::Continue);
                        }
                        iterations -= 1;
                        continue;
                    }
                    return Ok(CycleOutcome::Continue);
                }
            }
        }
    }

    /// Run every tool call of the turn in dispatch order, speaking the
    /// acknowledgment cues between dispatches. Tool failures become error
    /// results the model reads next turn.
    async fn dispatch_tools(
        &self,
        call: &mut Call,
        tool_calls: Vec<ToolCall>,
        style: MessageStyle,
        rag_hits: &mut Vec<SearchHit>,
    ) -> (Vec<ToolCall>, ToolControl) {
        let mut executed = Vec::with_capacity(tool_calls.len());
        let mut control_flow = ToolControl::Continue;
        let (cue_tx, mut cue_rx) = mpsc::channel(16);

        for mut tool_call in tool_calls {
            self.deps.metrics.on_tool_call(&tool_call.name);
            match self
                .deps
                .registry
                .invoke(call, &tool_call, style, &cue_tx)
                .await
            {
                Ok(outcome) => {
                    tool_call.result = Some(outcome.result);
                    rag_hits.extend(outcome.rag_hits);
                    if control_flow == ToolControl::Continue {
                        control_flow = outcome.control;
                    }
                }
                Err(e) => {
                    tracing::warn!(tool = %tool_call.name, error = %e, "tool dispatch failed");
                    tool_call.error = Some(e.to_string());
                }
            }
            executed.push(tool_call);

            // Speak queued cues in dispatch order, in the (possibly just
            // changed) call voice
            while let Ok((cue, cue_style)) = cue_rx.try_recv() {
                self.speak_cue(call, &cue, cue_style).await;
            }
        }
        (executed, control_flow)
    }

    /// Finalize the current Call and begin a fresh one for the same caller,
    /// carrying over the voice settings and the last exchange.
    async fn begin_new_claim(&self, old: &mut Call) -> ParlanceResult<Call> {
        self.save_call(old).await?;
        self.deps.dispatcher.dispatch_post_call(old).await?;

        let mut fresh = Call::new(old.initiate.clone());
        fresh.lang_current_short_code = old.lang_current_short_code.clone();
        fresh.voice_speed = old.voice_speed;
        fresh.append_message(Message::new(
            MessagePersona::Human,
            MessageAction::Call,
            "",
        ));
        if let Some(last) = old.messages.last() {
            fresh.append_message(last.clone());
        }
        self.save_call(&mut fresh).await?;
        tracing::info!(
            old_call = %old.call_id,
            new_call = %fresh.call_id,
            "claim reset, new call started"
        );
        Ok(fresh)
    }

    /// Persist under the lease. Conflicts here mean someone wrote without
    /// the lease; the stored version is adopted and this actor's state
    /// re-asserted, a bounded number of times.
    async fn save_call(&self, call: &mut Call) -> ParlanceResult<()> {
        let mut attempts = 0;
        loop {
            match self.deps.store.save(call).await {
                Ok(()) => return Ok(()),
                Err(StoreError::Conflict { stored, .. })
                    if attempts < self.deps.config.save_conflict_retries =>
                {
                    attempts += 1;
                    tracing::warn!(
                        call_id = %call.call_id,
                        attempts,
                        stored,
                        "save conflict under lease, re-asserting"
                    );
                    call.version = stored;
                }
                Err(e @ StoreError::Conflict { .. }) => {
                    self.deps
                        .metrics
                        .on_incident(Incident::SaveConflictExhausted);
                    tracing::error!(call_id = %call.call_id, error = %e, "conflict budget exhausted");
                    return Err(ParlanceError::FatalCall {
                        reason: format!("unresolvable save conflict: {e}"),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn apologize(&self, call: &mut Call, prompts: &PromptSet) -> ParlanceResult<()> {
        let apology = prompts.render(&prompts.apology, call);
        self.speak_stored(call, &apology, MessageStyle::None).await;
        self.save_call(call).await
    }

    /// Speak and record an assistant utterance.
    async fn speak_stored(&self, call: &mut Call, text: &str, style: MessageStyle) {
        self.speak_cue(call, text, style).await;
        call.append_message(Message::assistant(text, style));
    }

    /// Speak without recording (hold cues, re-engagements); stored copies
    /// of these derail the model.
    async fn speak_unstored(&self, call: &Call, text: &str) {
        self.speak_cue(call, text, MessageStyle::None).await;
    }

    async fn speak_cue(&self, call: &Call, text: &str, style: MessageStyle) {
        let voice = voice_params(call);
        if let Err(e) = self
            .deps
            .pipeline
            .speak_one(text, style, &voice, &voice.language)
            .await
        {
            tracing::warn!(error = %e, "utterance failed");
        }
    }

    fn pipeline_config(&self, call: &Call, prompts: &PromptSet) -> PipelineConfig {
        PipelineConfig {
            soft_timeout: std::time::Duration::from_secs(
                self.deps.flags.answer_soft_timeout_sec,
            ),
            hard_timeout: std::time::Duration::from_secs(
                self.deps.flags.answer_hard_timeout_sec,
            ),
            max_buffered_sentences: self.deps.config.max_buffered_sentences,
            max_sentence_chars: self.deps.config.max_sentence_chars,
            pivot_language: self.deps.config.pivot_language.clone(),
            still_working_phrase: prompts.render(&prompts.still_working, call),
        }
    }
}

fn voice_params(call: &Call) -> VoiceParams {
    let language = call.language();
    VoiceParams {
        language: language.short_code.clone(),
        voice: language.voice.clone(),
        speed: call.voice_speed,
    }
}

fn turn_config(flags: &FeatureFlags) -> TurnConfig {
    TurnConfig {
        vad_silence_timeout: std::time::Duration::from_millis(flags.vad_silence_timeout_ms),
        vad_cutoff_timeout: std::time::Duration::from_millis(flags.vad_cutoff_timeout_ms),
        phone_silence_timeout: std::time::Duration::from_secs(flags.phone_silence_timeout_sec),
    }
}

fn transition(state: &mut CallState, to: CallState, call_id: parlance_core::CallId) {
    if *state != to {
        tracing::debug!(%call_id, from = ?state, ?to, "state transition");
        *state = to;
    }
}
