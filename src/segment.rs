//! Sentence segmentation for incremental text streams.
//!
//! The text generator produces fragments with no boundary semantics; the
//! segmenter accumulates them and emits complete sentences as soon as a
//! terminator arrives, so synthesis can start before generation finishes.

/// Characters that end a sentence.
///
/// Covers both Japanese full-width terminators and their ASCII equivalents.
pub const SENTENCE_TERMINATORS: [char; 5] = ['。', '！', '？', '!', '?'];

/// Accumulates text fragments and extracts complete sentences.
///
/// One segmenter belongs to exactly one pipeline run; it is not reusable
/// across runs because [`finish`](Self::finish) consumes it.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    /// Create an empty segmenter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return every complete sentence it unlocked.
    ///
    /// Each returned sentence is trimmed and includes its terminator.
    /// Whitespace-only sentences are dropped.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);

        let mut sentences = Vec::new();
        while let Some(pos) = self.buffer.find(&SENTENCE_TERMINATORS[..]) {
            let end = pos
                + self.buffer[pos..]
                    .chars()
                    .next()
                    .map_or(0, char::len_utf8);
            let sentence = self.buffer[..end].trim().to_string();
            self.buffer.drain(..end);
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
        }
        sentences
    }

    /// Consume the segmenter, emitting any unterminated residue.
    ///
    /// Returns `None` when the remaining buffer is empty after trimming.
    #[must_use]
    pub fn finish(self) -> Option<String> {
        let rest = self.buffer.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}
