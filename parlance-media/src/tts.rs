//! Cancellable speech synthesis.
//!
//! One handle per synthesis request. Cancelling drops every chunk not yet
//! played; audio already on the wire is never rewound. Requests submitted
//! sequentially must not overlap, so the pipeline awaits each handle before
//! emitting the next sentence.

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

use parlance_core::{MediaError, MessageStyle};

/// One sentence to synthesize.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub style: MessageStyle,
    pub language: String,
    pub voice: String,
    /// Prosody rate, 0.75..=1.25
    pub speed: f32,
}

/// Terminal state of one synthesis.
#[derive(Debug, PartialEq, Eq)]
pub enum SynthesisOutcome {
    /// All audio flushed to the caller
    Completed,
    /// Cancelled before the remaining chunks played
    Cancelled,
    /// The synthesis backend failed
    Failed(MediaError),
}

/// Handle on one in-flight synthesis.
#[derive(Debug)]
pub struct SynthesisHandle {
    id: Uuid,
    done: oneshot::Receiver<SynthesisOutcome>,
    cancel: watch::Sender<bool>,
}

impl SynthesisHandle {
    /// Create a handle and its driver half for a synthesizer
    /// implementation.
    pub fn channel() -> (Self, SynthesisDriver) {
        let (done_tx, done_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (
            Self {
                id: Uuid::new_v4(),
                done: done_rx,
                cancel: cancel_tx,
            },
            SynthesisDriver {
                done: done_tx,
                cancelled: cancel_rx,
            },
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Discard buffered audio. The next not-yet-played chunk is dropped;
    /// the chunk currently on the wire finishes.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for the synthesis to finish, one way or another. Borrows so a
    /// racing consumer can still `cancel` after abandoning the wait.
    pub async fn wait(&mut self) -> SynthesisOutcome {
        match (&mut self.done).await {
            Ok(outcome) => outcome,
            // Driver dropped without reporting; treat as cancelled
            Err(_) => SynthesisOutcome::Cancelled,
        }
    }
}

/// Implementation half of a `SynthesisHandle`.
#[derive(Debug)]
pub struct SynthesisDriver {
    done: oneshot::Sender<SynthesisOutcome>,
    cancelled: watch::Receiver<bool>,
}

impl SynthesisDriver {
    /// Whether the consumer asked to cancel.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolve when the consumer cancels.
    pub async fn cancelled(&mut self) {
        if *self.cancelled.borrow() {
            return;
        }
        // The sender lives inside the handle; a dropped handle counts
        while self.cancelled.changed().await.is_ok() {
            if *self.cancelled.borrow() {
                return;
            }
        }
    }

    /// Report the terminal outcome.
    pub fn finish(self, outcome: SynthesisOutcome) {
        let _ = self.done.send(outcome);
    }
}

/// Text-to-speech bridge.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Queue one synthesis; returns immediately with its handle.
    async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisHandle, MediaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_completion() {
        let (mut handle, driver) = SynthesisHandle::channel();
        tokio::spawn(async move {
            driver.finish(SynthesisOutcome::Completed);
        });
        assert_eq!(handle.wait().await, SynthesisOutcome::Completed);
    }

    #[tokio::test]
    async fn test_cancel_reaches_driver() {
        let (mut handle, mut driver) = SynthesisHandle::channel();
        assert!(!driver.is_cancelled());
        handle.cancel();
        driver.cancelled().await;
        assert!(driver.is_cancelled());
        driver.finish(SynthesisOutcome::Cancelled);
        assert_eq!(handle.wait().await, SynthesisOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_dropped_driver_reads_as_cancelled() {
        let (mut handle, driver) = SynthesisHandle::channel();
        drop(driver);
        assert_eq!(handle.wait().await, SynthesisOutcome::Cancelled);
    }
}
