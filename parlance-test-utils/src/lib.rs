//! PARLANCE Test Utilities
//!
//! Centralized test infrastructure for the workspace:
//! - Scripted mock providers for LLM, STT, TTS, translation, safety,
//!   search, SMS, and sound
//! - Call fixtures for common scenarios
//! - Proptest generators for entity types

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use parlance_core::{
    Call, CallInitiate, ClaimField, ClaimFieldType, LanguageEntry, LlmError, LlmSettings,
    LlmTierSettings, MediaError, PhoneNumber,
};
use parlance_llm::{
    CompletionDelta, CompletionProvider, CompletionRequest, CompletionStream, FinishReason,
    ToolCallDelta,
};
use parlance_media::{
    ContentSafety, RecognitionEvent, SafetyVerdict, SearchHit, SmsSender, SoundPlayer,
    SpeechRecognizer, SpeechSynthesizer, SynthesisHandle, SynthesisOutcome, SynthesisRequest,
    Translator,
};

// ============================================================================
// FIXTURES
// ============================================================================

/// Standard French-first initiate block for tests.
pub fn sample_initiate(caller: &str) -> CallInitiate {
    CallInitiate {
        bot_name: "Esperanza".to_string(),
        bot_company: "Contoso Insurance".to_string(),
        agent_phone_number: PhoneNumber::parse("+33699999999").expect("fixture number"),
        caller_phone_number: PhoneNumber::parse(caller).expect("fixture number"),
        language_default: "fr-FR".to_string(),
        languages_available: vec![
            LanguageEntry::new(
                "fr-FR",
                "fr-FR-VivienneMultilingualNeural",
                vec!["French".to_string(), "FR".to_string()],
            ),
            LanguageEntry::new(
                "en-US",
                "en-US-ShimmerTurboMultilingualNeural",
                vec!["English".to_string(), "EN".to_string()],
            ),
        ],
        task_description: "Help the customer file an insurance claim.".to_string(),
        claim_schema: vec![
            ClaimField::new("policy_number", ClaimFieldType::Text)
                .with_description("Policy number of the customer"),
            ClaimField::new("incident_datetime", ClaimFieldType::Datetime)
                .with_description("Date and time of the incident"),
            ClaimField::new("incident_description", ClaimFieldType::Text)
                .with_description("Description of the incident"),
        ],
        prompts_overrides: None,
    }
}

/// A fresh call for the standard fixture caller.
pub fn sample_call(caller: &str) -> Call {
    Call::new(sample_initiate(caller))
}

/// Tier settings pointing nowhere; for drivers running on mocks.
pub fn sample_llm_settings() -> LlmSettings {
    let tier = LlmTierSettings {
        endpoint: "http://localhost:0".to_string(),
        api_key: "test-key".to_string(),
        model: "test-model".to_string(),
        context_window: 16_000,
        streaming: true,
    };
    LlmSettings {
        fast: tier.clone(),
        slow: tier,
    }
}

// ============================================================================
// SCRIPTED LLM
// ============================================================================

/// One scripted completion.
pub enum TurnScript {
    /// Yield these deltas in order, then end the stream
    Deltas(Vec<Result<CompletionDelta, LlmError>>),
    /// Never yield anything (drives timeout paths)
    Stall,
    /// Fail at stream establishment
    ConnectError(LlmError),
}

impl TurnScript {
    /// Plain text reply, chunked roughly per word, closing with `stop`.
    pub fn text(content: &str) -> Self {
        let mut deltas: Vec<Result<CompletionDelta, LlmError>> = content
            .split_inclusive(' ')
            .map(|piece| {
                Ok(CompletionDelta {
                    content: Some(piece.to_string()),
                    ..Default::default()
                })
            })
            .collect();
        deltas.push(Ok(CompletionDelta {
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        }));
        Self::Deltas(deltas)
    }

    /// A reply that is only a tool call, arguments split across deltas.
    pub fn tool_call(name: &str, arguments: &str) -> Self {
        Self::tool_calls(&[(name, arguments)])
    }

    /// Several tool calls in one turn.
    pub fn tool_calls(calls: &[(&str, &str)]) -> Self {
        let mut deltas: Vec<Result<CompletionDelta, LlmError>> = Vec::new();
        for (index, (name, arguments)) in calls.iter().enumerate() {
            deltas.push(Ok(CompletionDelta {
                tool_calls: vec![ToolCallDelta {
                    index,
                    id: Some(format!("call_{index}")),
                    name: Some(name.to_string()),
                    arguments: None,
                }],
                ..Default::default()
            }));
            let midpoint = arguments.len() / 2;
            for piece in [&arguments[..midpoint], &arguments[midpoint..]] {
                deltas.push(Ok(CompletionDelta {
                    tool_calls: vec![ToolCallDelta {
                        index,
                        id: None,
                        name: None,
                        arguments: Some(piece.to_string()),
                    }],
                    ..Default::default()
                }));
            }
        }
        deltas.push(Ok(CompletionDelta {
            finish_reason: Some(FinishReason::ToolCalls),
            ..Default::default()
        }));
        Self::Deltas(deltas)
    }

    /// Text followed by tool calls in the same turn.
    pub fn text_with_tool_calls(content: &str, calls: &[(&str, &str)]) -> Self {
        let Self::Deltas(mut deltas) = Self::text(content) else {
            unreachable!()
        };
        deltas.pop(); // replace the stop marker
        let Self::Deltas(tool_deltas) = Self::tool_calls(calls) else {
            unreachable!()
        };
        deltas.extend(tool_deltas);
        Self::Deltas(deltas)
    }
}

/// Completion provider replaying a queue of scripted turns.
pub struct ScriptedLlm {
    turns: Mutex<VecDeque<TurnScript>>,
    /// Pause between deltas so timing-sensitive tests can interleave
    pub delta_delay: Duration,
    requests: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(turns: Vec<TurnScript>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            delta_delay: Duration::from_millis(5),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn with_delta_delay(mut self, delay: Duration) -> Self {
        self.delta_delay = delay;
        self
    }

    /// Completions requested so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Append another scripted turn.
    pub fn push(&self, turn: TurnScript) {
        self.turns.lock().unwrap().push_back(turn);
    }
}

#[async_trait]
impl CompletionProvider for ScriptedLlm {
    async fn complete_stream(
        &self,
        _settings: &LlmTierSettings,
        _request: &CompletionRequest,
    ) -> Result<CompletionStream, LlmError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let script = self.turns.lock().unwrap().pop_front();
        match script {
            Some(TurnScript::Deltas(deltas)) => {
                let delay = self.delta_delay;
                Ok(stream::iter(deltas)
                    .then(move |delta| async move {
                        tokio::time::sleep(delay).await;
                        delta
                    })
                    .boxed())
            }
            Some(TurnScript::Stall) => {
                Ok(stream::pending::<Result<CompletionDelta, LlmError>>().boxed())
            }
            Some(TurnScript::ConnectError(e)) => Err(e),
            None => Ok(stream::iter(vec![Ok(CompletionDelta {
                content: Some("I have nothing to add.".to_string()),
                finish_reason: Some(FinishReason::Stop),
                ..Default::default()
            })])
            .boxed()),
        }
    }
}

// ============================================================================
// MOCK RECOGNIZER
// ============================================================================

/// Recognizer whose events are injected by the test.
pub struct MockRecognizer {
    sender: Mutex<Option<mpsc::Sender<RecognitionEvent>>>,
    started: AtomicUsize,
}

impl MockRecognizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sender: Mutex::new(None),
            started: AtomicUsize::new(0),
        })
    }

    /// Deliver one event to the active stream, waiting for `start` to have
    /// been called.
    pub async fn inject(&self, event: RecognitionEvent) {
        for _ in 0..200 {
            let sender = self.sender.lock().unwrap().clone();
            if let Some(sender) = sender {
                if sender.send(event).await.is_ok() {
                    return;
                }
                panic!("recognition stream receiver was dropped");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("recognizer was never started");
    }

    pub fn start_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechRecognizer for MockRecognizer {
    async fn start(
        &self,
        _language: &str,
    ) -> Result<mpsc::Receiver<RecognitionEvent>, MediaError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        *self.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop(&self) {
        self.sender.lock().unwrap().take();
    }
}

// ============================================================================
// MOCK SYNTHESIZER
// ============================================================================

/// Synthesizer recording every utterance; audio "plays" for a configurable
/// duration and honors cancellation.
pub struct MockSynthesizer {
    pub utterances: Mutex<Vec<String>>,
    pub cancelled: Arc<AtomicUsize>,
    /// Simulated playback duration per utterance
    pub playback: Duration,
}

impl MockSynthesizer {
    pub fn new() -> Arc<Self> {
        Self::with_playback(Duration::from_millis(20))
    }

    pub fn with_playback(playback: Duration) -> Arc<Self> {
        Arc::new(Self {
            utterances: Mutex::new(Vec::new()),
            cancelled: Arc::new(AtomicUsize::new(0)),
            playback,
        })
    }

    pub fn spoken(&self) -> Vec<String> {
        self.utterances.lock().unwrap().clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisHandle, MediaError> {
        let (handle, mut driver) = SynthesisHandle::channel();
        self.utterances.lock().unwrap().push(request.text.clone());
        let playback = self.playback;
        let cancelled = self.cancelled.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(playback) => {
                    driver.finish(SynthesisOutcome::Completed);
                }
                _ = driver.cancelled() => {
                    cancelled.fetch_add(1, Ordering::SeqCst);
                    driver.finish(SynthesisOutcome::Cancelled);
                }
            }
        });
        Ok(handle)
    }
}

// ============================================================================
// MOCK BRIDGES
// ============================================================================

/// Identity translator that records requests.
pub struct MockTranslator {
    pub requests: Mutex<Vec<(String, String)>>,
}

impl MockTranslator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(
        &self,
        text: &str,
        _source_lang: Option<&str>,
        target_lang: &str,
    ) -> Result<String, MediaError> {
        self.requests
            .lock()
            .unwrap()
            .push((text.to_string(), target_lang.to_string()));
        Ok(text.to_string())
    }
}

/// Safety filter blocking sentences that contain any listed needle.
pub struct BlocklistSafety {
    pub needles: Vec<String>,
}

impl BlocklistSafety {
    pub fn allow_all() -> Arc<Self> {
        Arc::new(Self {
            needles: Vec::new(),
        })
    }

    pub fn blocking(needles: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            needles: needles.iter().map(|n| n.to_string()).collect(),
        })
    }
}

#[async_trait]
impl ContentSafety for BlocklistSafety {
    async fn check(&self, text: &str) -> Result<SafetyVerdict, MediaError> {
        let lowered = text.to_lowercase();
        let matched: Vec<String> = self
            .needles
            .iter()
            .filter(|needle| lowered.contains(needle.to_lowercase().as_str()))
            .cloned()
            .collect();
        if matched.is_empty() {
            Ok(SafetyVerdict::allowed())
        } else {
            Ok(SafetyVerdict::blocked(matched))
        }
    }
}

/// Search returning fixed hits.
pub struct MockSearch {
    pub hits: Vec<SearchHit>,
}

impl MockSearch {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self { hits: Vec::new() })
    }

    pub fn with_hits(hits: Vec<SearchHit>) -> Arc<Self> {
        Arc::new(Self { hits })
    }
}

#[async_trait]
impl parlance_media::VectorSearch for MockSearch {
    async fn search(&self, _query: &str, k: usize) -> Result<Vec<SearchHit>, MediaError> {
        Ok(self.hits.iter().take(k).cloned().collect())
    }
}

/// SMS sender recording outbound messages.
pub struct MockSms {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl MockSms {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl SmsSender for MockSms {
    async fn send(&self, to: &PhoneNumber, body: &str) -> Result<(), MediaError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.as_str().to_string(), body.to_string()));
        Ok(())
    }
}

/// Sound player that ignores everything.
pub struct NoSound;

impl NoSound {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl SoundPlayer for NoSound {
    async fn play_loop(&self, _sound: parlance_media::AmbientSound) -> Result<(), MediaError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), MediaError> {
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn phone_number() -> impl Strategy<Value = PhoneNumber> {
        "[1-9][0-9]{8,13}"
            .prop_map(|digits| PhoneNumber::parse(&format!("+{digits}")).expect("generated E.164"))
    }

    pub fn claim_field_type() -> impl Strategy<Value = ClaimFieldType> {
        prop_oneof![
            Just(ClaimFieldType::Text),
            Just(ClaimFieldType::Email),
            Just(ClaimFieldType::Datetime),
            Just(ClaimFieldType::PhoneNumber),
        ]
    }

    pub fn claim_field() -> impl Strategy<Value = ClaimField> {
        ("[a-z_]{3,20}", claim_field_type()).prop_map(|(name, field_type)| ClaimField {
            name,
            field_type,
            description: None,
        })
    }

    pub fn message() -> impl Strategy<Value = parlance_core::Message> {
        (".{0,80}", prop_oneof![
            Just(parlance_core::MessagePersona::Human),
            Just(parlance_core::MessagePersona::Assistant),
        ])
            .prop_map(|(content, persona)| {
                parlance_core::Message::new(persona, parlance_core::MessageAction::Talk, content)
            })
    }

    pub fn call() -> impl Strategy<Value = Call> {
        (phone_number(), proptest::collection::vec(message(), 0..8)).prop_map(
            |(phone, messages)| {
                let mut call = Call::new(super::sample_initiate("+33612345678"));
                call.initiate.caller_phone_number = phone;
                for message in messages {
                    call.append_message(message);
                }
                call
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_scripted_llm_replays_turns() {
        let llm = ScriptedLlm::new(vec![TurnScript::text("Hello there. ")]);
        let settings = sample_llm_settings();
        let mut stream = llm
            .complete_stream(&settings.fast, &CompletionRequest::new(vec![]))
            .await
            .unwrap();
        let mut content = String::new();
        while let Some(delta) = stream.next().await {
            if let Some(piece) = delta.unwrap().content {
                content.push_str(&piece);
            }
        }
        assert_eq!(content, "Hello there. ");
        assert_eq!(llm.request_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_synthesizer_records_and_cancels() {
        let synthesizer = MockSynthesizer::with_playback(Duration::from_secs(5));
        let mut handle = synthesizer
            .synthesize(SynthesisRequest {
                text: "long sentence".to_string(),
                style: parlance_core::MessageStyle::None,
                language: "fr-FR".to_string(),
                voice: "voice".to_string(),
                speed: 1.0,
            })
            .await
            .unwrap();
        handle.cancel();
        assert_eq!(handle.wait().await, SynthesisOutcome::Cancelled);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(synthesizer.cancel_count(), 1);
        assert_eq!(synthesizer.spoken(), vec!["long sentence".to_string()]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_call_serde_round_trip(call in generators::call()) {
            let json = serde_json::to_string(&call).unwrap();
            let parsed: Call = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(call, parsed);
        }

        #[test]
        fn prop_generated_phone_numbers_are_valid(phone in generators::phone_number()) {
            prop_assert!(PhoneNumber::parse(phone.as_str()).is_ok());
        }
    }
}
