//! Ambient sound control.
//!
//! The loading tone loops while the bot is thinking; the noise floor plays
//! while waiting for the caller so the line never sounds dead. Barge-in and
//! speech both stop whatever is looping.

use async_trait::async_trait;

use parlance_core::MediaError;

/// Pre-authored ambient sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbientSound {
    /// Loopable "mmm" thinking tone
    Loading,
    /// Gentle background noise while listening
    NoiseFloor,
}

/// Sound playback bridge.
#[async_trait]
pub trait SoundPlayer: Send + Sync {
    /// Start looping a sound, replacing whatever was playing.
    async fn play_loop(&self, sound: AmbientSound) -> Result<(), MediaError>;

    /// Stop any looping sound.
    async fn stop(&self) -> Result<(), MediaError>;
}
