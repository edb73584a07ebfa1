//! PARLANCE Media - Speech and AI-Service Bridges
//!
//! Abstractions over the external media plane: streaming speech
//! recognition, cancellable synthesis, ambient sound control, turn
//! detection over the recognition stream, sentence segmentation for
//! synthesis, and the thin bridges to translation, content safety, vector
//! search, and SMS delivery.

mod bridges;
mod sentence;
mod sound;
mod stt;
mod tts;
mod turn;

pub use bridges::{ContentSafety, SafetyVerdict, SearchHit, SmsSender, Translator, VectorSearch};
pub use sentence::SentenceSplitter;
pub use sound::{AmbientSound, SoundPlayer};
pub use stt::{RecognitionEvent, RecognitionKind, SpeechRecognizer, WsRecognizer};
pub use tts::{
    SpeechSynthesizer, SynthesisDriver, SynthesisHandle, SynthesisOutcome, SynthesisRequest,
};
pub use turn::{TurnConfig, TurnDetector, TurnEvent};
