//! Speech-to-text contract and transcript filtering.
//!
//! Transcription is a synchronous, CPU/GPU-bound call; the capture loop
//! offloads it to the blocking pool so it never stalls the scheduler.
//! The filtering applied after recognition is shared by every backend:
//! near-empty results and known recognizer boilerplate are discarded.

use crate::error::VoiceError;

/// Synchronous bytes → optional-text speech recognition.
///
/// Implementations should run [`filter_transcript`] over their raw output
/// so that all backends share the same notion of a usable transcript.
pub trait Transcriber: Send + Sync {
    /// Transcribe a captured audio buffer.
    ///
    /// Returns `Ok(None)` when no usable speech was recognized.
    fn transcribe(&self, audio: &[u8]) -> Result<Option<String>, VoiceError>;
}

/// Transcripts this short are treated as recognition noise.
const MIN_TRANSCRIPT_CHARS: usize = 2;

/// Boilerplate phrases the recognizer hallucinates on near-silence
/// (YouTube-style outros it was trained on). Substring match.
const BOILERPLATE: [&str; 4] = ["ご視聴", "ありがとうございました", "チャンネル登録", "字幕"];

/// Apply the shared transcript filter.
///
/// Trims the text, then rejects results that are too short or contain a
/// boilerplate phrase.
#[must_use]
pub fn filter_transcript(text: &str) -> Option<String> {
    let text = text.trim();

    if text.chars().count() < MIN_TRANSCRIPT_CHARS {
        tracing::debug!(text = %text, "Transcript too short; skipping");
        return None;
    }
    if BOILERPLATE.iter().any(|phrase| text.contains(phrase)) {
        tracing::debug!(text = %text, "Boilerplate transcript; skipping");
        return None;
    }

    Some(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usable_transcript_passes_trimmed() {
        assert_eq!(
            filter_transcript("  こんにちは "),
            Some("こんにちは".to_string())
        );
    }

    #[test]
    fn single_char_is_rejected() {
        assert_eq!(filter_transcript("あ"), None);
        assert_eq!(filter_transcript("   "), None);
        assert_eq!(filter_transcript(""), None);
    }

    #[test]
    fn boilerplate_is_rejected() {
        assert_eq!(filter_transcript("ご視聴ありがとうございました"), None);
        assert_eq!(filter_transcript("チャンネル登録お願いします"), None);
    }

    #[test]
    fn boilerplate_matches_as_substring() {
        assert_eq!(filter_transcript("今日の字幕はこちら"), None);
    }
}
