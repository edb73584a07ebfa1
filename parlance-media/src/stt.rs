//! Streaming speech recognition.
//!
//! The recognizer owns its transport (WebSocket for the hosted engines) and
//! surfaces a flat stream of `RecognitionEvent`s; reconnects are handled
//! inside the bridge so consumers only ever see a gap in events.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite};

use parlance_core::MediaError;

/// What one recognition event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionKind {
    /// Interim hypothesis; text may still change
    Partial,
    /// Finalized utterance segment
    Final,
    /// The engine reports a silence window
    Silence,
    /// The engine considers the utterance complete
    RecognitionComplete,
}

/// One event on the recognition stream.
#[derive(Debug, Clone)]
pub struct RecognitionEvent {
    pub kind: RecognitionKind,
    pub text: String,
    pub detected_language: Option<String>,
    pub at: Instant,
}

impl RecognitionEvent {
    pub fn new(kind: RecognitionKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            detected_language: None,
            at: Instant::now(),
        }
    }
}

/// Speech-to-text bridge.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Start (or restart) recognition in `language`; events arrive on the
    /// returned channel until `stop` or transport teardown.
    async fn start(&self, language: &str)
        -> Result<mpsc::Receiver<RecognitionEvent>, MediaError>;

    /// Stop recognition and release the transport.
    async fn stop(&self);
}

// ============================================================================
// WEBSOCKET RECOGNIZER
// ============================================================================

/// Wire frame of the streaming recognition endpoint.
#[derive(Debug, Deserialize)]
struct SttFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
}

/// Recognizer over a WebSocket STT endpoint.
///
/// The pump task reconnects with a short pause when the socket drops
/// mid-call; consumers keep their receiver. Audio ingress is wired by the
/// telephony adapter on the same socket and is out of scope here.
pub struct WsRecognizer {
    endpoint: String,
    api_key: String,
    channel_capacity: usize,
    pump: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WsRecognizer {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            channel_capacity: 64,
            pump: tokio::sync::Mutex::new(None),
        }
    }

    fn frame_to_event(frame: SttFrame) -> Option<RecognitionEvent> {
        let kind = match frame.kind.as_str() {
            "partial" => RecognitionKind::Partial,
            "final" => RecognitionKind::Final,
            "silence" => RecognitionKind::Silence,
            "recognition_complete" => RecognitionKind::RecognitionComplete,
            other => {
                tracing::debug!(kind = other, "ignoring unknown STT frame");
                return None;
            }
        };
        Some(RecognitionEvent {
            kind,
            text: frame.text,
            detected_language: frame.language,
            at: Instant::now(),
        })
    }

    async fn pump_loop(
        endpoint: String,
        api_key: String,
        language: String,
        events: mpsc::Sender<RecognitionEvent>,
    ) {
        loop {
            let url = format!("{endpoint}?language={language}");
            let (mut socket, _) = match connect_async(&url).await {
                Ok(connected) => connected,
                Err(e) => {
                    tracing::warn!(error = %e, "STT connect failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    continue;
                }
            };
            if socket
                .send(tungstenite::Message::Text(
                    serde_json::json!({ "auth": api_key }).to_string(),
                ))
                .await
                .is_err()
            {
                continue;
            }

            while let Some(message) = socket.next().await {
                match message {
                    Ok(tungstenite::Message::Text(json)) => {
                        match serde_json::from_str::<SttFrame>(&json) {
                            Ok(frame) => {
                                if let Some(event) = Self::frame_to_event(frame) {
                                    if events.send(event).await.is_err() {
                                        // Consumer is gone; tear down
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "unparsable STT frame");
                            }
                        }
                    }
                    Ok(tungstenite::Message::Ping(_)) | Ok(tungstenite::Message::Pong(_)) => {}
                    Ok(tungstenite::Message::Close(_)) | Err(_) => break,
                    Ok(other) => {
                        tracing::debug!(message = ?other, "unsupported STT message type");
                    }
                }
            }

            if events.is_closed() {
                return;
            }
            tracing::info!("STT socket dropped, reconnecting");
        }
    }
}

#[async_trait]
impl SpeechRecognizer for WsRecognizer {
    async fn start(
        &self,
        language: &str,
    ) -> Result<mpsc::Receiver<RecognitionEvent>, MediaError> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let handle = tokio::spawn(Self::pump_loop(
            self.endpoint.clone(),
            self.api_key.clone(),
            language.to_string(),
            tx,
        ));
        let mut pump = self.pump.lock().await;
        if let Some(previous) = pump.replace(handle) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn stop(&self) {
        let mut pump = self.pump.lock().await;
        if let Some(handle) = pump.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_mapping() {
        let frame: SttFrame =
            serde_json::from_str(r#"{"type":"final","text":"bonjour","language":"fr-FR"}"#)
                .unwrap();
        let event = WsRecognizer::frame_to_event(frame).unwrap();
        assert_eq!(event.kind, RecognitionKind::Final);
        assert_eq!(event.text, "bonjour");
        assert_eq!(event.detected_language.as_deref(), Some("fr-FR"));
    }

    #[test]
    fn test_unknown_frame_ignored() {
        let frame: SttFrame = serde_json::from_str(r#"{"type":"metadata"}"#).unwrap();
        assert!(WsRecognizer::frame_to_event(frame).is_none());
    }
}
