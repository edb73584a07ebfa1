//! OpenAI-compatible chat-completions provider.
//!
//! Works against any endpoint speaking the chat-completions protocol
//! (OpenAI, Azure OpenAI with the compatibility path, local gateways).
//! Requests are rate limited; streaming responses are decoded from SSE into
//! `CompletionDelta`s. Non-streaming endpoints are supported by emulating a
//! one-delta stream.

mod sse;
mod types;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};

use parlance_core::{LlmError, LlmTierSettings};

use crate::{
    CompletionDelta, CompletionProvider, CompletionRequest, CompletionStream, FinishReason,
    ToolCallDelta,
};
use sse::SseDecoder;
use types::{
    chunk_to_delta, parse_finish_reason, to_wire_message, to_wire_tool, ApiError,
    ChatCompletionRequest, ChunkResponse, Completion,
};

/// OpenAI-compatible provider with rate limiting.
pub struct OpenAiProvider {
    client: reqwest::Client,
    /// Caps in-flight requests
    concurrency: Arc<Semaphore>,
    /// Start of the most recent request, for interval pacing
    last_request: Mutex<Option<Instant>>,
    min_request_interval: Duration,
    tier_label: String,
}

impl OpenAiProvider {
    /// Create a provider.
    ///
    /// # Arguments
    /// * `tier_label` - "fast" or "slow", used in error reporting
    /// * `requests_per_minute` - request pacing cap
    pub fn new(tier_label: impl Into<String>, requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1);
        Self {
            client: reqwest::Client::new(),
            concurrency: Arc::new(Semaphore::new(rpm as usize)),
            last_request: Mutex::new(None),
            min_request_interval: Duration::from_millis((60_000 / rpm as u64).max(10)),
            tier_label: tier_label.into(),
        }
    }

    async fn pace(&self) -> Result<(), LlmError> {
        let _permit = self.concurrency.acquire().await.map_err(|e| {
            LlmError::InvalidResponse {
                tier: self.tier_label.clone(),
                reason: format!("rate limiter closed: {e}"),
            }
        })?;
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_request_interval {
                tokio::time::sleep(self.min_request_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }

    fn build_body(settings: &LlmTierSettings, request: &CompletionRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: settings.model.clone(),
            messages: request.messages.iter().map(to_wire_message).collect(),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(request.tools.iter().map(to_wire_tool).collect())
            },
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            seed: request.seed,
            stream: settings.streaming,
        }
    }

    async fn send(
        &self,
        settings: &LlmTierSettings,
        body: &ChatCompletionRequest,
    ) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", settings.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&settings.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                tier: self.tier_label.clone(),
                status: 0,
                message: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&error_text)
            .map(|e| e.error.message)
            .unwrap_or(error_text);

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
                tier: self.tier_label.clone(),
            },
            StatusCode::BAD_REQUEST if message.contains("content_filter") => {
                LlmError::SafetyCheck { reason: message }
            }
            _ => LlmError::RequestFailed {
                tier: self.tier_label.clone(),
                status: status.as_u16(),
                message,
            },
        })
    }

    fn stream_from_sse(&self, response: reqwest::Response) -> CompletionStream {
        struct State {
            bytes: Pin<Box<dyn futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
            decoder: SseDecoder,
            pending: VecDeque<Result<CompletionDelta, LlmError>>,
            done: bool,
            tier: String,
        }

        let state = State {
            bytes: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            done: false,
            tier: self.tier_label.clone(),
        };

        stream::unfold(state, |mut st| async move {
            loop {
                if let Some(item) = st.pending.pop_front() {
                    return Some((item, st));
                }
                if st.done {
                    return None;
                }
                match st.bytes.next().await {
                    Some(Ok(chunk)) => {
                        for payload in st.decoder.feed(&chunk) {
                            if payload == "[DONE]" {
                                st.done = true;
                                break;
                            }
                            match serde_json::from_str::<ChunkResponse>(&payload) {
                                Ok(parsed) => {
                                    if let Some(delta) = chunk_to_delta(parsed) {
                                        if delta.finish_reason
                                            == Some(FinishReason::ContentFilter)
                                        {
                                            st.pending.push_back(Err(LlmError::SafetyCheck {
                                                reason: "completion flagged by content filter"
                                                    .to_string(),
                                            }));
                                            st.done = true;
                                            break;
                                        }
                                        st.pending.push_back(Ok(delta));
                                    }
                                }
                                Err(e) => {
                                    st.pending.push_back(Err(LlmError::InvalidResponse {
                                        tier: st.tier.clone(),
                                        reason: format!("bad SSE payload: {e}"),
                                    }));
                                    st.done = true;
                                    break;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        st.done = true;
                        return Some((
                            Err(LlmError::RequestFailed {
                                tier: st.tier.clone(),
                                status: 0,
                                message: format!("stream read failed: {e}"),
                            }),
                            st,
                        ));
                    }
                    None => {
                        st.done = true;
                        return None;
                    }
                }
            }
        })
        .boxed()
    }

    async fn stream_from_completion(
        &self,
        response: reqwest::Response,
    ) -> Result<CompletionStream, LlmError> {
        let completion: Completion =
            response.json().await.map_err(|e| LlmError::InvalidResponse {
                tier: self.tier_label.clone(),
                reason: format!("bad completion body: {e}"),
            })?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                tier: self.tier_label.clone(),
                reason: "no choices in completion".to_string(),
            })?;

        let finish = choice.finish_reason.as_deref().and_then(parse_finish_reason);
        if finish == Some(FinishReason::ContentFilter) {
            return Err(LlmError::SafetyCheck {
                reason: "completion flagged by content filter".to_string(),
            });
        }

        let mut delta = CompletionDelta {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls: Vec::new(),
            finish_reason: finish,
        };
        for (index, call) in choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
        {
            delta.tool_calls.push(ToolCallDelta {
                index,
                id: Some(call.id),
                name: Some(call.function.name),
                arguments: Some(call.function.arguments),
            });
        }

        Ok(stream::iter(vec![Ok(delta)]).boxed())
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete_stream(
        &self,
        settings: &LlmTierSettings,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, LlmError> {
        self.pace().await?;
        let body = Self::build_body(settings, request);
        let response = self.send(settings, &body).await?;
        if settings.streaming {
            Ok(self.stream_from_sse(response))
        } else {
            self.stream_from_completion(response).await
        }
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("tier", &self.tier_label)
            .field("min_request_interval", &self.min_request_interval)
            .finish()
    }
}
