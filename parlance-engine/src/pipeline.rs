//! Response pipeline: completion deltas in, ordered speech out.
//!
//! Tokens accumulate into sentences; each sentence is translated to the
//! caller's language if needed, passed through content safety, and handed
//! to the synthesizer in order through a bounded channel (backpressure
//! pauses extraction when the synthesizer falls behind). Tool-call deltas
//! are buffered out-of-band and never spoken. Barge-in cancels the in-
//! flight synthesis and the completion stream; the hard timeout aborts the
//! turn.

use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use parlance_core::{LlmError, MessageStyle, ToolCall};
use parlance_llm::{CompletionStream, FinishReason, ToolCallAccumulator, INVALID_PARALLEL_TOOL};
use parlance_media::{
    AmbientSound, ContentSafety, SentenceSplitter, SoundPlayer, SpeechSynthesizer,
    SynthesisOutcome, SynthesisRequest, Translator,
};

use crate::{
    extract_style_prefix, strip_action_prefix, CancelScope, EngineMetrics,
};

/// Per-turn pipeline parameters.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub soft_timeout: Duration,
    pub hard_timeout: Duration,
    pub max_buffered_sentences: usize,
    pub max_sentence_chars: usize,
    /// Language LLM output is authored in
    pub pivot_language: String,
    /// Pre-authored "still working" cue, already localized
    pub still_working_phrase: String,
}

/// Voice parameters for the active call.
#[derive(Debug, Clone)]
pub struct VoiceParams {
    pub language: String,
    pub voice: String,
    pub speed: f32,
}

/// How the turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnFinish {
    /// All sentences flushed to the caller
    Completed,
    /// Caller interrupted; the partial reply was retained
    BargedIn,
    /// No full response within the hard timeout
    HardTimeout,
    /// Model hit the token cap; the turn should be retried
    MaxTokens,
    /// Content safety rejected the exchange
    Safety,
    /// Transport failure mid-stream
    Error(LlmError),
}

/// What one pipeline run produced.
#[derive(Debug)]
pub struct TurnOutput {
    /// Pivot-language text to persist as the assistant message
    pub spoken_text: String,
    pub style: MessageStyle,
    /// Assembled tool calls, not yet dispatched
    pub tool_calls: Vec<ToolCall>,
    pub finish: TurnFinish,
    /// Whether any sentence was dropped by the safety filter
    pub filtered: bool,
}

/// The speech side of one call.
pub struct ResponsePipeline {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    translator: Arc<dyn Translator>,
    safety: Arc<dyn ContentSafety>,
    sound: Arc<dyn SoundPlayer>,
    metrics: Arc<dyn EngineMetrics>,
}

impl ResponsePipeline {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        translator: Arc<dyn Translator>,
        safety: Arc<dyn ContentSafety>,
        sound: Arc<dyn SoundPlayer>,
        metrics: Arc<dyn EngineMetrics>,
    ) -> Self {
        Self {
            synthesizer,
            translator,
            safety,
            sound,
            metrics,
        }
    }

    /// Speak one standalone utterance (canned phrase or tool cue),
    /// translated and safety-checked like any sentence. Returns once the
    /// audio flushed or was cancelled.
    pub async fn speak_one(
        &self,
        text: &str,
        style: MessageStyle,
        voice: &VoiceParams,
        pivot_language: &str,
    ) -> Result<bool, parlance_core::MediaError> {
        let prepared = self
            .prepare_sentence(text, voice, pivot_language)
            .await?;
        let Some(prepared) = prepared else {
            return Ok(false);
        };
        let mut handle = self
            .synthesizer
            .synthesize(SynthesisRequest {
                text: prepared,
                style,
                language: voice.language.clone(),
                voice: voice.voice.clone(),
                speed: voice.speed,
            })
            .await?;
        Ok(matches!(handle.wait().await, SynthesisOutcome::Completed))
    }

    /// Translate into the caller's language and run content safety.
    /// `Ok(None)` means the sentence was filtered out.
    async fn prepare_sentence(
        &self,
        text: &str,
        voice: &VoiceParams,
        pivot_language: &str,
    ) -> Result<Option<String>, parlance_core::MediaError> {
        let translated = if voice.language != pivot_language {
            self.translator
                .translate(text, Some(pivot_language), &voice.language)
                .await?
        } else {
            text.to_string()
        };
        let verdict = self.safety.check(&translated).await?;
        if !verdict.allowed {
            tracing::warn!(
                categories = ?verdict.categories_matched,
                "sentence dropped by content safety"
            );
            self.metrics.on_sentence_filtered();
            return Ok(None);
        }
        Ok(Some(translated))
    }

    /// Run one assistant turn.
    ///
    /// `barge_in` flips when the caller starts speaking over the bot;
    /// `speaking` is flipped while synthesis is in progress so the turn
    /// detector can suppress turn ends and arm barge-in.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        mut stream: CompletionStream,
        initial_style: MessageStyle,
        voice: VoiceParams,
        config: PipelineConfig,
        barge_in: watch::Receiver<bool>,
        speaking: watch::Sender<bool>,
        scope: &CancelScope,
    ) -> TurnOutput {
        let turn_scope = scope.child_with_timeout(config.hard_timeout);
        let (sentence_tx, sentence_rx) =
            mpsc::channel::<(String, MessageStyle)>(config.max_buffered_sentences);

        let spoken: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let filtered = Arc::new(AtomicBool::new(false));

        let mut emitter = tokio::spawn(self.clone_parts().emit_loop(
            sentence_rx,
            voice.clone(),
            config.clone(),
            barge_in.clone(),
            speaking.clone(),
            spoken.clone(),
            filtered.clone(),
        ));

        // Thinking tone until the first sentence is ready
        if let Err(e) = self.sound.play_loop(AmbientSound::Loading).await {
            tracing::debug!(error = %e, "loading sound unavailable");
        }

        let mut splitter = SentenceSplitter::new(config.max_sentence_chars);
        let mut accumulator = ToolCallAccumulator::new();
        let mut style = initial_style;
        let mut sentences: Vec<String> = Vec::new();
        let mut max_tokens_reached = false;
        let mut soft_cue_pending = true;
        let mut finish = TurnFinish::Completed;
        let mut barge_watch = barge_in.clone();

        let soft_deadline = tokio::time::Instant::now() + config.soft_timeout;

        loop {
            tokio::select! {
                delta = stream.next() => {
                    match delta {
                        Some(Ok(delta)) => {
                            for piece in &delta.tool_calls {
                                accumulator.feed(piece);
                            }
                            if delta.finish_reason == Some(FinishReason::Length) {
                                max_tokens_reached = true;
                            }
                            if let Some(content) = &delta.content {
                                soft_cue_pending = false;
                                for raw in splitter.push(content) {
                                    let (new_style, sentence) =
                                        clean_sentence(&raw, style);
                                    style = new_style;
                                    if sentence.is_empty() {
                                        continue;
                                    }
                                    sentences.push(sentence.clone());
                                    if sentence_tx.send((sentence, style)).await.is_err() {
                                        // Emitter stopped: barge-in won
                                        finish = TurnFinish::BargedIn;
                                        break;
                                    }
                                }
                                if finish == TurnFinish::BargedIn {
                                    break;
                                }
                            }
                        }
                        Some(Err(LlmError::SafetyCheck { reason })) => {
                            tracing::warn!(%reason, "safety check tripped mid-stream");
                            finish = TurnFinish::Safety;
                            break;
                        }
                        Some(Err(e)) => {
                            finish = TurnFinish::Error(e);
                            break;
                        }
                        None => break,
                    }
                }
                changed = barge_watch.changed() => {
                    if changed.is_ok() && *barge_watch.borrow() {
                        finish = TurnFinish::BargedIn;
                        break;
                    }
                }
                _ = tokio::time::sleep_until(soft_deadline), if soft_cue_pending => {
                    soft_cue_pending = false;
                    tracing::warn!(
                        timeout_sec = config.soft_timeout.as_secs(),
                        "soft answer timeout, speaking hold cue"
                    );
                    // Not stored: timeout prompts in the history derail the model
                    if let Err(e) = self
                        .speak_one(
                            &config.still_working_phrase,
                            MessageStyle::None,
                            &voice,
                            &voice.language,
                        )
                        .await
                    {
                        tracing::debug!(error = %e, "hold cue failed");
                    }
                }
                _ = turn_scope.cancelled() => {
                    finish = if scope.is_cancelled() {
                        TurnFinish::Error(LlmError::Cancelled)
                    } else {
                        TurnFinish::HardTimeout
                    };
                    break;
                }
            }
        }

        // Cancel the completion: dropping the stream closes the connection
        drop(stream);

        if finish == TurnFinish::Completed {
            // Flush the remainder and let queued sentences drain
            if let Some(rest) = splitter.flush() {
                let (new_style, sentence) = clean_sentence(&rest, style);
                style = new_style;
                if !sentence.is_empty() {
                    sentences.push(sentence.clone());
                    let _ = sentence_tx.send((sentence, style)).await;
                }
            }
            drop(sentence_tx);
            let drained = turn_scope
                .run(async {
                    let mut watch = barge_in.clone();
                    tokio::select! {
                        _ = &mut emitter => true,
                        changed = watch.changed() => {
                            changed.is_err() || !*watch.borrow()
                        }
                    }
                })
                .await;
            match drained {
                Some(true) => {}
                Some(false) => finish = TurnFinish::BargedIn,
                None => {
                    emitter.abort();
                    finish = TurnFinish::HardTimeout;
                }
            }
        } else {
            drop(sentence_tx);
            emitter.abort();
        }

        let _ = self.sound.stop().await;
        let _ = speaking.send(false);

        if finish == TurnFinish::Completed && max_tokens_reached {
            finish = TurnFinish::MaxTokens;
        }
        if finish == TurnFinish::BargedIn {
            self.metrics.on_barge_in();
        }

        let mut tool_calls = accumulator.finish();
        if tool_calls
            .iter()
            .any(|call| call.name == INVALID_PARALLEL_TOOL)
        {
            tracing::warn!("model emitted the invalid parallel tool schema");
            tool_calls.clear();
            if finish == TurnFinish::Completed {
                finish = TurnFinish::Error(LlmError::InvalidResponse {
                    tier: "stream".to_string(),
                    reason: "invalid parallel tool schema".to_string(),
                });
            }
        }

        // On barge-in only what was actually synthesized is retained
        let spoken_text = match finish {
            TurnFinish::BargedIn | TurnFinish::HardTimeout => {
                spoken.lock().unwrap_or_else(|p| p.into_inner()).join(" ")
            }
            _ => sentences.join(" "),
        };

        if matches!(finish, TurnFinish::Completed) {
            self.metrics.on_turn_completed();
        }

        TurnOutput {
            spoken_text,
            style,
            tool_calls,
            finish,
            filtered: filtered.load(Ordering::SeqCst),
        }
    }

    fn clone_parts(&self) -> EmitterParts {
        EmitterParts {
            synthesizer: self.synthesizer.clone(),
            translator: self.translator.clone(),
            safety: self.safety.clone(),
            sound: self.sound.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Owned halves of the pipeline the emitter task runs with.
struct EmitterParts {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    translator: Arc<dyn Translator>,
    safety: Arc<dyn ContentSafety>,
    sound: Arc<dyn SoundPlayer>,
    metrics: Arc<dyn EngineMetrics>,
}

impl EmitterParts {
    /// Sequentially synthesize queued sentences; never overlapping, in
    /// extraction order. Stops at barge-in, cancelling the in-flight
    /// handle so the next unplayed chunk is dropped.
    #[allow(clippy::too_many_arguments)]
    async fn emit_loop(
        self,
        mut sentences: mpsc::Receiver<(String, MessageStyle)>,
        voice: VoiceParams,
        config: PipelineConfig,
        mut barge_in: watch::Receiver<bool>,
        speaking: watch::Sender<bool>,
        spoken: Arc<Mutex<Vec<String>>>,
        filtered: Arc<AtomicBool>,
    ) {
        let mut first = true;
        while let Some((sentence, style)) = sentences.recv().await {
            if *barge_in.borrow() {
                return;
            }
            let prepared = match self
                .prepare(&sentence, &voice, &config.pivot_language)
                .await
            {
                Ok(Some(prepared)) => prepared,
                Ok(None) => {
                    filtered.store(true, Ordering::SeqCst);
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "sentence preparation failed, skipping");
                    continue;
                }
            };

            if first {
                first = false;
                let _ = self.sound.stop().await;
                let _ = speaking.send(true);
            }

            let mut handle = match self
                .synthesizer
                .synthesize(SynthesisRequest {
                    text: prepared,
                    style,
                    language: voice.language.clone(),
                    voice: voice.voice.clone(),
                    speed: voice.speed,
                })
                .await
            {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!(error = %e, "synthesis failed, skipping sentence");
                    continue;
                }
            };

            tokio::select! {
                outcome = handle.wait() => {
                    if outcome == SynthesisOutcome::Completed {
                        spoken
                            .lock()
                            .unwrap_or_else(|p| p.into_inner())
                            .push(sentence);
                    }
                }
                changed = barge_in.changed() => {
                    if changed.is_err() || *barge_in.borrow() {
                        // Drop the not-yet-played audio, never rewind
                        handle.cancel();
                        return;
                    }
                }
            }
        }
    }

    async fn prepare(
        &self,
        text: &str,
        voice: &VoiceParams,
        pivot_language: &str,
    ) -> Result<Option<String>, parlance_core::MediaError> {
        let translated = if voice.language != pivot_language {
            self.translator
                .translate(text, Some(pivot_language), &voice.language)
                .await?
        } else {
            text.to_string()
        };
        let verdict = self.safety.check(&translated).await?;
        if !verdict.allowed {
            self.metrics.on_sentence_filtered();
            return Ok(None);
        }
        Ok(Some(translated))
    }
}

/// Strip hallucinated `action=`/`style=` prefixes, updating the running
/// style when a selector is present.
fn clean_sentence(raw: &str, current: MessageStyle) -> (MessageStyle, String) {
    let without_action = strip_action_prefix(raw);
    let (style, text) = extract_style_prefix(without_action);
    (style.unwrap_or(current), text.trim().to_string())
}
