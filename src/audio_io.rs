//! Audio I/O trait abstractions for the voice pipeline.
//!
//! These traits decouple the pipeline and the capture loop from any
//! specific voice transport (local devices, a Discord-style gateway, a
//! WebSocket bridge, …). Concrete adapters are injected at the
//! composition root.
//!
//! [`AudioSource`] and [`AudioSink`] are object-safe: all methods take
//! `&self`, and implementations use interior mutability (channels, atomic
//! flags) for state changes.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::VoiceError;

// ── Speakers ───────────────────────────────────────────────────────

/// A participant on the voice connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Speaker {
    /// Transport-level user identifier.
    pub id: i64,
    /// Display name used in prompts and logs.
    pub name: String,
}

/// The result of one finalized capture window.
#[derive(Debug)]
pub struct CapturedAudio {
    /// Raw captured audio bytes (transport-native encoding).
    pub data: Vec<u8>,
    /// First speaker observed during the window, if any.
    pub speaker: Option<Speaker>,
}

// ── Capture sink ───────────────────────────────────────────────────

/// Receives audio written during one capture window.
///
/// The sink owns speaker identification: the first speaker written is the
/// one reported by [`finalize`](Self::finalize), deterministically,
/// regardless of how many participants talk over each other.
pub trait CaptureSink: Send {
    /// Append audio attributed to `speaker`.
    fn write(&mut self, speaker: &Speaker, data: &[u8]);

    /// Close the window and hand back everything captured.
    fn finalize(self: Box<Self>) -> CapturedAudio;
}

/// In-memory [`CaptureSink`] accumulating bytes and the first speaker.
#[derive(Debug, Default)]
pub struct BufferSink {
    data: Vec<u8>,
    first_speaker: Option<Speaker>,
}

impl BufferSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureSink for BufferSink {
    fn write(&mut self, speaker: &Speaker, data: &[u8]) {
        if self.first_speaker.is_none() {
            self.first_speaker = Some(speaker.clone());
        }
        self.data.extend_from_slice(data);
    }

    fn finalize(self: Box<Self>) -> CapturedAudio {
        CapturedAudio {
            data: self.data,
            speaker: self.first_speaker,
        }
    }
}

// ── Audio source ───────────────────────────────────────────────────

/// Abstraction over incoming voice audio (microphone / gateway receive).
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Whether the underlying voice connection is still alive.
    fn is_connected(&self) -> bool;

    /// Record into `sink` for the given wall-clock window, then stop.
    async fn record(
        &self,
        sink: &mut dyn CaptureSink,
        window: Duration,
    ) -> Result<(), VoiceError>;
}

// ── Audio sink ─────────────────────────────────────────────────────

/// Abstraction over the playback output (speaker / gateway transmit).
///
/// The player drives this strictly sequentially: it calls
/// [`play`](Self::play) and then polls [`is_playing`](Self::is_playing)
/// until the audio has fully finished before submitting the next utterance.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Whether the underlying voice connection is ready for playback.
    fn is_connected(&self) -> bool;

    /// Submit one utterance's audio for playback.
    async fn play(&self, audio: Vec<u8>) -> Result<(), VoiceError>;

    /// Whether submitted audio is still being played out.
    fn is_playing(&self) -> bool;
}
