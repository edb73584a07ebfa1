//! Turn detection over the recognition stream.
//!
//! Decides when the caller has finished a turn, when they are interrupting
//! the bot, and when the line has gone quiet for too long. Pure state
//! machine: events and clock ticks in, `TurnEvent`s out.

use std::time::{Duration, Instant};

use crate::{RecognitionEvent, RecognitionKind};

/// Detection thresholds; see the runtime flag table for defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnConfig {
    /// Silence window closing a finalized utterance
    pub vad_silence_timeout: Duration,
    /// Grace period after recognition-complete
    pub vad_cutoff_timeout: Duration,
    /// Continuous silence before an idle warning
    pub phone_silence_timeout: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            vad_silence_timeout: Duration::from_millis(500),
            vad_cutoff_timeout: Duration::from_millis(250),
            phone_silence_timeout: Duration::from_secs(20),
        }
    }
}

/// What the detector emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// The caller finished a turn; `text` is the collected utterance
    TurnEnded { text: String },
    /// The caller started speaking while the bot was speaking
    BargeIn,
    /// Nothing heard for the idle window
    IdleWarn,
}

/// Per-call turn detector.
#[derive(Debug)]
pub struct TurnDetector {
    config: TurnConfig,
    last_partial_at: Option<Instant>,
    last_final_at: Option<Instant>,
    /// Whether the bot is currently speaking
    speaking: bool,
    collected: Vec<String>,
    /// Deadline armed by a recognition-complete grace period
    complete_deadline: Option<Instant>,
    /// Start of the current silence stretch, for idle warnings
    idle_since: Instant,
}

impl TurnDetector {
    pub fn new(config: TurnConfig) -> Self {
        Self {
            config,
            last_partial_at: None,
            last_final_at: None,
            speaking: false,
            collected: Vec::new(),
            complete_deadline: None,
            idle_since: Instant::now(),
        }
    }

    /// Tell the detector whether the bot is speaking; suppresses turn ends
    /// and arms barge-in.
    pub fn set_speaking(&mut self, speaking: bool) {
        self.speaking = speaking;
        if !speaking {
            self.idle_since = Instant::now();
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feed one recognition event.
    pub fn on_event(&mut self, event: &RecognitionEvent) -> Option<TurnEvent> {
        match event.kind {
            RecognitionKind::Partial => {
                // Tie-break: a turn end whose trigger predates this partial
                // wins over the barge-in
                if let Some(ended) = self.due_turn_end(event.at) {
                    self.note_activity(event.at);
                    self.last_partial_at = Some(event.at);
                    return Some(ended);
                }
                self.note_activity(event.at);
                self.last_partial_at = Some(event.at);
                self.complete_deadline = None;
                if self.speaking && !event.text.trim().is_empty() {
                    return Some(TurnEvent::BargeIn);
                }
                None
            }
            RecognitionKind::Final => {
                self.note_activity(event.at);
                self.last_final_at = Some(event.at);
                self.complete_deadline = None;
                let text = event.text.trim();
                if !text.is_empty() {
                    self.collected.push(text.to_string());
                }
                None
            }
            RecognitionKind::RecognitionComplete => {
                if self.collected.is_empty() {
                    // Nothing was said; a complete marker alone is a no-op
                    return None;
                }
                self.complete_deadline = Some(event.at + self.config.vad_cutoff_timeout);
                None
            }
            RecognitionKind::Silence => self.poll(event.at),
        }
    }

    /// Advance the clock; emits due turn ends and idle warnings.
    pub fn poll(&mut self, now: Instant) -> Option<TurnEvent> {
        if let Some(ended) = self.due_turn_end(now) {
            return Some(ended);
        }
        if !self.speaking
            && self.collected.is_empty()
            && now.duration_since(self.idle_since) >= self.config.phone_silence_timeout
        {
            self.idle_since = now;
            return Some(TurnEvent::IdleWarn);
        }
        None
    }

    /// Next instant at which `poll` could have something to say.
    pub fn next_deadline(&self) -> Instant {
        let mut deadline = self.idle_since + self.config.phone_silence_timeout;
        if let Some(at) = self.complete_deadline {
            deadline = deadline.min(at);
        }
        if !self.collected.is_empty() {
            if let Some(at) = self.last_final_at {
                deadline = deadline.min(at + self.config.vad_silence_timeout);
            }
        }
        deadline
    }

    fn due_turn_end(&mut self, now: Instant) -> Option<TurnEvent> {
        if self.collected.is_empty() || self.speaking {
            return None;
        }
        let complete_due = self
            .complete_deadline
            .is_some_and(|deadline| now >= deadline);
        // Quiet since the last recognition activity of any kind; a partial
        // after the final keeps the turn open
        let quiet_since = match (self.last_final_at, self.last_partial_at) {
            (Some(final_at), Some(partial_at)) => final_at.max(partial_at),
            (Some(final_at), None) => final_at,
            _ => return None,
        };
        let silence_due =
            now.duration_since(quiet_since) >= self.config.vad_silence_timeout;

        if complete_due || silence_due {
            let text = self.collected.join(" ");
            self.reset_turn(now);
            return Some(TurnEvent::TurnEnded { text });
        }
        None
    }

    fn note_activity(&mut self, at: Instant) {
        self.idle_since = at;
    }

    fn reset_turn(&mut self, now: Instant) {
        self.collected.clear();
        self.last_partial_at = None;
        self.last_final_at = None;
        self.complete_deadline = None;
        self.idle_since = now;
    }
}
