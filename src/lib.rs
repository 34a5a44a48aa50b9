//! Voice conversation core.
//!
//! Koebot turns a voice channel into a conversation loop: it captures audio
//! in fixed windows, transcribes it, streams a language-model reply, and
//! speaks that reply sentence by sentence while the rest of it is still
//! being generated.
//!
//! The crate is transport-agnostic. Callers provide [`AudioSource`] and
//! [`AudioSink`] implementations for whatever channel they sit on (Discord,
//! local devices, a test harness) and wire them into a [`CaptureSession`].
//!
//! Pipeline shape:
//!
//! ```text
//! AudioSource ─▶ Transcriber ─▶ TextGenerator ─▶ SentenceSegmenter
//!                                                      │
//!                              AudioSink ◀─ ordered ◀─ Synthesizer (concurrent)
//! ```
//!
//! Sentences are synthesized concurrently but always played in the order
//! they were produced; see [`pipeline::run`].

pub mod audio_io;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod segment;
pub mod session;
pub mod stt;
pub mod tts;

#[cfg(feature = "whisper")]
pub mod whisper;

pub use audio_io::{AudioSink, AudioSource, BufferSink, CaptureSink, CapturedAudio, Speaker};
pub use config::Config;
pub use db::{VoiceLogRow, VoiceLogStore};
pub use error::VoiceError;
pub use llm::{CliGenerator, FragmentStream, OllamaGenerator, TextGenerator};
pub use pipeline::fallback_utterance;
pub use segment::SentenceSegmenter;
pub use session::{CaptureSession, SessionConfig, SessionState};
pub use stt::Transcriber;
pub use tts::{Synthesizer, TtsClient};

#[cfg(feature = "whisper")]
pub use whisper::WhisperTranscriber;
