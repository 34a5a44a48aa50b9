//! Utterance synthesis: a VOICEVOX-compatible HTTP client.
//!
//! Synthesis is a two-step exchange: `audio_query` parameterizes the
//! utterance (voice, pitch, speed) and `synthesis` renders it to audio
//! bytes. Both steps are time-bounded; the query step is cheap and gets a
//! short timeout, rendering gets a longer one.
//!
//! Synthesis is best-effort: any network error, timeout, or malformed
//! response is logged and reported as an absent result so that one failed
//! utterance never aborts a pipeline run.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Config;
use crate::error::VoiceError;

/// Timeout for the parameterization step.
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the rendering step.
const RENDER_TIMEOUT: Duration = Duration::from_secs(15);

// ── Synthesizer trait ──────────────────────────────────────────────

/// One-utterance text-to-audio synthesis.
///
/// Object-safe so the pipeline can hold an `Arc<dyn Synthesizer>` and
/// spawn many concurrent calls against a shared connection pool.
/// Implementations must contain their own failures: a failed utterance
/// returns `None`, never an error.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize one utterance, returning audio bytes or `None` on failure.
    async fn synthesize(&self, text: &str) -> Option<Vec<u8>>;
}

// ── HTTP client adapter ────────────────────────────────────────────

/// Client for a VOICEVOX-compatible synthesis service.
pub struct TtsClient {
    /// Shared connection pool; safe for concurrent use.
    http: reqwest::Client,
    base_url: String,
    /// Voice (speaker style) identifier passed to both steps.
    voice: u32,
    /// Speed override applied to the query object before rendering.
    speed: f32,
}

impl TtsClient {
    /// Create a client sharing the given connection pool.
    #[must_use]
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        Self {
            http,
            base_url: config.synthesis_url.trim_end_matches('/').to_string(),
            voice: config.synthesis_voice,
            speed: config.synthesis_speed,
        }
    }

    /// Run the two-step exchange, propagating failures to the caller.
    async fn render(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        let voice = self.voice.to_string();

        let mut query: Value = self
            .http
            .post(format!("{}/audio_query", self.base_url))
            .query(&[("text", text), ("speaker", voice.as_str())])
            .timeout(QUERY_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(query_obj) = query.as_object_mut() else {
            return Err(VoiceError::Synthesis(
                "audio query response was not a JSON object".to_string(),
            ));
        };
        query_obj.insert("speedScale".to_string(), Value::from(self.speed));

        let audio = self
            .http
            .post(format!("{}/synthesis", self.base_url))
            .query(&[("speaker", voice.as_str())])
            .timeout(RENDER_TIMEOUT)
            .json(&query)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        Ok(audio.to_vec())
    }
}

#[async_trait]
impl Synthesizer for TtsClient {
    async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        match self.render(text).await {
            Ok(audio) => {
                tracing::debug!(bytes = audio.len(), text = %text, "Synthesis complete");
                Some(audio)
            }
            Err(e) => {
                tracing::warn!(error = %e, text = %text, "Synthesis failed; utterance will be skipped");
                None
            }
        }
    }
}
