//! Whisper.cpp speech-to-text backend (feature `whisper`).
//!
//! Decodes 16 kHz mono PCM16 capture buffers with a local whisper model.
//! The model is loaded once and kept resident; each call creates a fresh
//! inference state, so one backend instance is safe to share.

use std::path::Path;
use std::sync::Arc;

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::error::VoiceError;
use crate::stt::{Transcriber, filter_transcript};

/// Whisper.cpp transcriber.
pub struct WhisperTranscriber {
    context: Arc<WhisperContext>,
    language: String,
}

impl WhisperTranscriber {
    /// Load a whisper GGML model from disk.
    pub fn load(model_path: &Path, language: &str) -> Result<Self, VoiceError> {
        let model_path_str = model_path.to_str().ok_or_else(|| {
            VoiceError::Transcription("invalid model path".to_string())
        })?;

        tracing::info!(path = %model_path.display(), "Loading whisper model");

        let context =
            WhisperContext::new_with_params(model_path_str, WhisperContextParameters::default())
                .map_err(|e| VoiceError::Transcription(format!("{e}")))?;

        tracing::info!("Whisper model loaded");

        Ok(Self {
            context: Arc::new(context),
            language: language.to_string(),
        })
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio: &[u8]) -> Result<Option<String>, VoiceError> {
        let samples = pcm16_to_f32(audio);
        if samples.is_empty() {
            return Ok(None);
        }

        let mut state = self
            .context
            .create_state()
            .map_err(|e| VoiceError::Transcription(format!("failed to create state: {e}")))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(self.language.as_str()));
        params.set_no_timestamps(true);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_special(false);

        state
            .full(params, &samples)
            .map_err(|e| VoiceError::Transcription(format!("{e}")))?;

        let num_segments = state.full_n_segments();
        let mut text = String::new();
        for i in 0..num_segments {
            if let Some(segment) = state.get_segment(i) {
                if let Ok(segment_text) = segment.to_str() {
                    text.push_str(segment_text.trim());
                }
            }
        }

        tracing::debug!(segments = num_segments, chars = text.chars().count(), "Transcription complete");
        Ok(filter_transcript(&text))
    }
}

/// Decode little-endian PCM16 bytes to normalized f32 samples.
fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}
