//! End-to-end call scenarios over scripted providers.
//!
//! Each test drives the orchestrator through a real conversation shape:
//! greeting, caller turns injected into the mock recognizer, scripted
//! completions, and a hangup. No network, real timers scaled down.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use parlance_core::{
    ConversationConfig, FeatureFlags, JobKind, MessageAction, MessagePersona, NextAction,
    QueueName, RetryConfig,
};
use parlance_engine::{
    CallOrchestrator, CancelScope, ControlEvent, Dispatcher, EngineMetrics, Incident,
    OrchestratorDeps, PromptAssembler, PromptSet, ResponsePipeline, ToolRegistry,
};
use parlance_llm::LlmDriver;
use parlance_media::{RecognitionEvent, RecognitionKind};
use parlance_store::{
    CallStore, JobEvent, LeaseManager, MemoryCallStore, MemoryKeyValue, MemoryQueue,
    QueueEnvelope, WorkQueue,
};
use parlance_test_utils::{
    sample_call, sample_llm_settings, BlocklistSafety, MockRecognizer, MockSms, MockSynthesizer,
    MockTranslator, MockSearch, NoSound, ScriptedLlm, TurnScript,
};

#[derive(Default)]
struct RecordingMetrics {
    incidents: Mutex<Vec<Incident>>,
    barge_ins: Mutex<usize>,
}

impl EngineMetrics for RecordingMetrics {
    fn on_barge_in(&self) {
        *self.barge_ins.lock().unwrap() += 1;
    }

    fn on_incident(&self, incident: Incident) {
        self.incidents.lock().unwrap().push(incident);
    }
}

struct Harness {
    orchestrator: Arc<CallOrchestrator>,
    store: Arc<MemoryCallStore>,
    queue: Arc<MemoryQueue>,
    recognizer: Arc<MockRecognizer>,
    synthesizer: Arc<MockSynthesizer>,
    llm: Arc<ScriptedLlm>,
    metrics: Arc<RecordingMetrics>,
}

fn quick_flags() -> FeatureFlags {
    FeatureFlags {
        vad_silence_timeout_ms: 50,
        vad_cutoff_timeout_ms: 25,
        phone_silence_timeout_sec: 2,
        ..FeatureFlags::default()
    }
}

fn harness(turns: Vec<TurnScript>, flags: FeatureFlags, playback: Duration) -> Harness {
    let store = Arc::new(MemoryCallStore::new());
    let kv = Arc::new(MemoryKeyValue::new());
    let queue = Arc::new(MemoryQueue::new());
    let recognizer = MockRecognizer::new();
    let synthesizer = MockSynthesizer::with_playback(playback);
    let llm = Arc::new(ScriptedLlm::new(turns));
    let metrics = Arc::new(RecordingMetrics::default());

    let retry = RetryConfig {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        backoff_multiplier: 2.0,
    };
    let driver = Arc::new(LlmDriver::new(
        sample_llm_settings(),
        llm.clone(),
        llm.clone(),
        retry,
    ));
    let pipeline = Arc::new(ResponsePipeline::new(
        synthesizer.clone(),
        MockTranslator::new(),
        BlocklistSafety::allow_all(),
        NoSound::new(),
        metrics.clone(),
    ));
    let registry = Arc::new(ToolRegistry::new(MockSms::new(), MockSearch::empty()));

    let deps = OrchestratorDeps {
        store: store.clone(),
        lease: LeaseManager::new(kv.clone()),
        driver,
        registry,
        recognizer: recognizer.clone(),
        pipeline,
        assembler: PromptAssembler::new(16_000, 160),
        prompts: PromptSet::default(),
        dispatcher: Dispatcher::new(queue.clone(), kv),
        metrics: metrics.clone(),
        flags,
        config: ConversationConfig::default(),
    };

    Harness {
        orchestrator: Arc::new(CallOrchestrator::new(deps)),
        store,
        queue,
        recognizer,
        synthesizer,
        llm,
        metrics,
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn final_event(text: &str) -> RecognitionEvent {
    RecognitionEvent::new(RecognitionKind::Final, text)
}

fn partial_event(text: &str) -> RecognitionEvent {
    RecognitionEvent::new(RecognitionKind::Partial, text)
}

#[tokio::test]
async fn scenario_happy_path_files_policy_number() {
    let harness = harness(
        vec![
            TurnScript::tool_call(
                "update_claim",
                r#"{"customer_response": "Je note votre numero de police.", "field": "policy_number", "value": "B01371946"}"#,
            ),
            TurnScript::text("C'est note. Que puis-je faire d'autre? "),
        ],
        quick_flags(),
        Duration::from_millis(5),
    );

    let call = sample_call("+33612345678");
    let (ctrl_tx, ctrl_rx) = mpsc::channel(8);
    let run = {
        let orchestrator = harness.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_call(call, ctrl_rx, CancelScope::new()).await })
    };

    // Greeting must be spoken before the caller talks
    let synthesizer = harness.synthesizer.clone();
    wait_until("greeting", || !synthesizer.spoken().is_empty()).await;

    harness
        .recognizer
        .inject(final_event("I want to file a claim, my policy is B01371946"))
        .await;

    // Both completions consumed: the tool turn, then the spoken reply
    let llm = harness.llm.clone();
    wait_until("both llm turns", || llm.request_count() >= 2).await;
    let synthesizer = harness.synthesizer.clone();
    wait_until("spoken reply", || {
        synthesizer
            .spoken()
            .iter()
            .any(|s| s.contains("C'est note"))
    })
    .await;

    ctrl_tx
        .send(ControlEvent::Hangup { fingerprint: None })
        .await
        .unwrap();
    let finished = run.await.unwrap().unwrap();

    // Claim was populated through the tool
    assert_eq!(
        finished.claim.get("policy_number").map(String::as_str),
        Some("B01371946")
    );

    // One human turn, assistant reply carrying the tool call
    let human_turns: Vec<_> = finished
        .messages
        .iter()
        .filter(|m| m.persona == MessagePersona::Human && m.action == MessageAction::Talk)
        .collect();
    assert_eq!(human_turns.len(), 1);
    assert!(human_turns[0].content.contains("B01371946"));

    let with_tools = finished
        .messages
        .iter()
        .find(|m| !m.tool_calls.is_empty())
        .expect("assistant turn with tool call");
    assert_eq!(with_tools.tool_calls[0].name, "update_claim");
    assert!(with_tools.tool_calls[0].result.is_some());

    // The acknowledgment cue was spoken
    assert!(harness
        .synthesizer
        .spoken()
        .iter()
        .any(|s| s.contains("Je note votre numero")));

    // Closed call persisted and post-call job enqueued
    let stored = harness
        .store
        .get_by_id(finished.call_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.in_progress());
    let jobs = harness
        .queue
        .receive(QueueName::PostCall, 10, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    let job = QueueEnvelope::<JobEvent>::from_json(QueueName::PostCall, &jobs[0].payload).unwrap();
    assert_eq!(job.body.kind, JobKind::PostCall);
    assert_eq!(job.body.call_id, finished.call_id);
}

#[tokio::test]
async fn scenario_barge_in_keeps_only_spoken_sentences() {
    // Six short sentences, 80ms of audio each
    let harness = harness(
        vec![TurnScript::text(
            "One is first. Two is second. Three is third. Four is fourth. Five is fifth. Six is sixth. ",
        )],
        quick_flags(),
        Duration::from_millis(80),
    );

    let call = sample_call("+33612345678");
    let (ctrl_tx, ctrl_rx) = mpsc::channel(8);
    let run = {
        let orchestrator = harness.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_call(call, ctrl_rx, CancelScope::new()).await })
    };

    let synthesizer = harness.synthesizer.clone();
    wait_until("greeting", || !synthesizer.spoken().is_empty()).await;
    harness.recognizer.inject(final_event("tell me a story")).await;

    // Wait until the fourth sentence reached the synthesizer, then
    // interrupt while it is playing
    let synthesizer = harness.synthesizer.clone();
    wait_until("fourth sentence synthesis", || {
        synthesizer.spoken().iter().any(|s| s.contains("Four"))
    })
    .await;
    harness.recognizer.inject(partial_event("Attendez")).await;

    // The barge-in must cancel the in-flight synthesis
    let synthesizer = harness.synthesizer.clone();
    wait_until("synthesis cancelled", || synthesizer.cancel_count() >= 1).await;
    assert_eq!(*harness.metrics.barge_ins.lock().unwrap(), 1);

    ctrl_tx
        .send(ControlEvent::Hangup { fingerprint: None })
        .await
        .unwrap();
    let finished = run.await.unwrap().unwrap();

    // The retained assistant text stops at the last fully spoken sentence
    let reply = finished
        .messages
        .iter()
        .rev()
        .find(|m| {
            m.persona == MessagePersona::Assistant
                && m.action == MessageAction::Talk
                && m.content.contains("One is first")
        })
        .expect("partial assistant reply");
    assert!(reply.content.contains("Three is third"));
    assert!(!reply.content.contains("Five is fifth"));
    assert!(!reply.content.contains("Six is sixth"));

    // Nothing newer than the barge-in was synthesized
    assert!(!harness
        .synthesizer
        .spoken()
        .iter()
        .any(|s| s.contains("Six is sixth")));
}

#[tokio::test]
async fn scenario_tool_call_repair_dispatches_without_retry() {
    // Trailing comma in the argument JSON, as models sometimes emit
    let harness = harness(
        vec![
            TurnScript::tool_call(
                "update_claim",
                r#"{ "customer_response": "Saving it.", "field": "policy_number", "value": "ABC123",}"#,
            ),
            TurnScript::text("Done. "),
        ],
        quick_flags(),
        Duration::from_millis(5),
    );

    let call = sample_call("+33612345678");
    let (ctrl_tx, ctrl_rx) = mpsc::channel(8);
    let run = {
        let orchestrator = harness.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_call(call, ctrl_rx, CancelScope::new()).await })
    };

    let synthesizer = harness.synthesizer.clone();
    wait_until("greeting", || !synthesizer.spoken().is_empty()).await;
    harness
        .recognizer
        .inject(final_event("my policy is ABC123"))
        .await;

    let llm = harness.llm.clone();
    wait_until("turn finished", || llm.request_count() >= 2).await;
    ctrl_tx
        .send(ControlEvent::Hangup { fingerprint: None })
        .await
        .unwrap();
    let finished = run.await.unwrap().unwrap();

    assert_eq!(
        finished.claim.get("policy_number").map(String::as_str),
        Some("ABC123")
    );
    let with_tools = finished
        .messages
        .iter()
        .find(|m| !m.tool_calls.is_empty())
        .expect("tool call turn");
    assert!(with_tools.tool_calls[0].error.is_none());
    // Exactly the two scripted completions: repair did not burn a retry
    assert_eq!(harness.llm.request_count(), 2);
}

#[tokio::test]
async fn scenario_hard_timeout_aborts_turn_with_one_apology() {
    let flags = FeatureFlags {
        answer_soft_timeout_sec: 10, // keep the hold cue out of the way
        answer_hard_timeout_sec: 1,
        ..quick_flags()
    };
    let harness = harness(vec![TurnScript::Stall], flags, Duration::from_millis(5));

    let call = sample_call("+33612345678");
    let (ctrl_tx, ctrl_rx) = mpsc::channel(8);
    let run = {
        let orchestrator = harness.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_call(call, ctrl_rx, CancelScope::new()).await })
    };

    let synthesizer = harness.synthesizer.clone();
    wait_until("greeting", || !synthesizer.spoken().is_empty()).await;
    harness.recognizer.inject(final_event("hello?")).await;

    let metrics = harness.metrics.clone();
    wait_until("hard timeout incident", || {
        metrics
            .incidents
            .lock()
            .unwrap()
            .contains(&Incident::HardTimeout)
    })
    .await;

    let synthesizer = harness.synthesizer.clone();
    wait_until("apology spoken", || {
        synthesizer.spoken().iter().any(|s| s.contains("sorry"))
    })
    .await;

    ctrl_tx
        .send(ControlEvent::Hangup { fingerprint: None })
        .await
        .unwrap();
    let finished = run.await.unwrap().unwrap();

    // No more than one apology per turn
    let apologies = harness
        .synthesizer
        .spoken()
        .iter()
        .filter(|s| s.contains("sorry"))
        .count();
    assert_eq!(apologies, 1);
    assert_eq!(
        *harness.metrics.incidents.lock().unwrap(),
        vec![Incident::HardTimeout]
    );
    // The turn aborted but the call survived to the hangup
    assert!(finished
        .messages
        .iter()
        .any(|m| m.action == MessageAction::Hangup));
}

#[tokio::test]
async fn scenario_idle_caller_gets_warned_then_dropped() {
    let flags = FeatureFlags {
        phone_silence_timeout_sec: 1,
        recognition_retry_max: 3,
        ..quick_flags()
    };
    let harness = harness(vec![], flags, Duration::from_millis(5));

    let call = sample_call("+33612345678");
    let (_ctrl_tx, ctrl_rx) = mpsc::channel(8);
    let run = {
        let orchestrator = harness.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_call(call, ctrl_rx, CancelScope::new()).await })
    };

    // Silence all the way: three re-engagements, then goodbye
    let finished = tokio::time::timeout(Duration::from_secs(20), run)
        .await
        .expect("call must end on its own")
        .unwrap()
        .unwrap();

    let warnings = harness
        .synthesizer
        .spoken()
        .iter()
        .filter(|s| s.contains("still there"))
        .count();
    assert_eq!(warnings, 3);
    assert_eq!(
        finished.next.as_ref().map(|n| n.action),
        Some(NextAction::Silence)
    );
    assert!(finished
        .messages
        .iter()
        .any(|m| m.action == MessageAction::Hangup));
}

#[tokio::test]
async fn scenario_sms_mid_call_appends_silently() {
    let harness = harness(vec![], quick_flags(), Duration::from_millis(5));

    let call = sample_call("+33612345678");
    let (ctrl_tx, ctrl_rx) = mpsc::channel(8);
    let run = {
        let orchestrator = harness.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_call(call, ctrl_rx, CancelScope::new()).await })
    };

    let synthesizer = harness.synthesizer.clone();
    wait_until("greeting", || !synthesizer.spoken().is_empty()).await;

    let sms = parlance_store::SmsEvent {
        from: parlance_core::PhoneNumber::parse("+33612345678").unwrap(),
        to: parlance_core::PhoneNumber::parse("+33699999999").unwrap(),
        body: "Here is my email: marie@example.com".to_string(),
        received_at: chrono::Utc::now(),
    };
    ctrl_tx
        .send(ControlEvent::Sms {
            event: sms,
            fingerprint: Some("sms-1".to_string()),
        })
        .await
        .unwrap();

    let synthesizer = harness.synthesizer.clone();
    wait_until("sms cue", || {
        synthesizer
            .spoken()
            .iter()
            .any(|s| s.contains("received your message"))
    })
    .await;

    // Duplicate delivery is ignored
    let sms_dup = parlance_store::SmsEvent {
        from: parlance_core::PhoneNumber::parse("+33612345678").unwrap(),
        to: parlance_core::PhoneNumber::parse("+33699999999").unwrap(),
        body: "Here is my email: marie@example.com".to_string(),
        received_at: chrono::Utc::now(),
    };
    ctrl_tx
        .send(ControlEvent::Sms {
            event: sms_dup,
            fingerprint: Some("sms-1".to_string()),
        })
        .await
        .unwrap();

    ctrl_tx
        .send(ControlEvent::Hangup { fingerprint: None })
        .await
        .unwrap();
    let finished = run.await.unwrap().unwrap();

    let sms_messages: Vec<_> = finished
        .messages
        .iter()
        .filter(|m| m.action == MessageAction::Sms && m.persona == MessagePersona::Human)
        .collect();
    assert_eq!(sms_messages.len(), 1);
    assert!(sms_messages[0].content.contains("marie@example.com"));
}
