//! Capture/dispatch loop: the per-connection conversation state machine.
//!
//! ```text
//!   Idle → Listening → Transcribing → Dispatching → Listening (loop)
//!          ▲                                            │
//!          └──────────── stop trigger / disconnect ─────┘
//! ```
//!
//! Each iteration captures a fixed window of audio, transcribes it off the
//! scheduler, and runs one pipeline for a recognized utterance, awaited
//! to completion, so pipeline runs never overlap. Any error inside one
//! iteration is contained and the loop continues.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::audio_io::{AudioSink, AudioSource, BufferSink, CaptureSink, Speaker};
use crate::db::VoiceLogStore;
use crate::error::VoiceError;
use crate::llm::TextGenerator;
use crate::pipeline;
use crate::stt::Transcriber;
use crate::tts::Synthesizer;

// ── State machine ──────────────────────────────────────────────────

/// Current state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not listening; session stopped or never started.
    Idle,
    /// Capturing one fixed window of audio.
    Listening,
    /// Recognizing speech in the captured window.
    Transcribing,
    /// One pipeline run in flight; awaited before listening resumes.
    Dispatching,
}

// ── Configuration ──────────────────────────────────────────────────

/// Tuning knobs for the capture loop.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wall-clock length of one capture window.
    pub capture_window: Duration,
    /// Captures smaller than this never reach the transcriber.
    pub min_capture_bytes: usize,
    /// Label used when no speaker was observed in the window.
    pub default_speaker_name: String,
    /// Pause between loop iterations.
    pub iteration_pause: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture_window: Duration::from_secs(3),
            min_capture_bytes: 1000,
            default_speaker_name: "名無しさん".to_string(),
            iteration_pause: Duration::from_millis(100),
        }
    }
}

// ── Capture session ────────────────────────────────────────────────

/// The listening lifecycle of one voice connection.
///
/// Owns the loop's state; the active flag is the only thing a stop
/// trigger touches, so an in-progress pipeline run always drains fully.
pub struct CaptureSession {
    source: Arc<dyn AudioSource>,
    sink: Arc<dyn AudioSink>,
    transcriber: Arc<dyn Transcriber>,
    synthesizer: Arc<dyn Synthesizer>,
    generator: Arc<dyn TextGenerator>,
    /// Fire-and-forget log target; `None` disables persistence.
    log_store: Option<Arc<VoiceLogStore>>,
    config: SessionConfig,
    active: Arc<AtomicBool>,
    state: Mutex<SessionState>,
}

impl CaptureSession {
    /// Assemble a session from its collaborators.
    #[must_use]
    pub fn new(
        source: Arc<dyn AudioSource>,
        sink: Arc<dyn AudioSink>,
        transcriber: Arc<dyn Transcriber>,
        synthesizer: Arc<dyn Synthesizer>,
        generator: Arc<dyn TextGenerator>,
        log_store: Option<Arc<VoiceLogStore>>,
        config: SessionConfig,
    ) -> Self {
        Self {
            source,
            sink,
            transcriber,
            synthesizer,
            generator,
            log_store,
            config,
            active: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(SessionState::Idle),
        }
    }

    /// Whether the capture loop is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Current state of the loop.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Request the loop to stop.
    ///
    /// Observed at the top of the next iteration; an in-progress pipeline
    /// run is not preempted.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        tracing::info!("Capture session stop requested");
    }

    /// Run the capture loop until a stop trigger or loss of connection.
    ///
    /// Returns `AlreadyActive` if the session is already running; any
    /// other failure is contained inside its iteration.
    pub async fn run(&self) -> Result<(), VoiceError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(VoiceError::AlreadyActive);
        }
        tracing::info!("Capture session started");

        while self.active.load(Ordering::SeqCst) {
            if !self.source.is_connected() {
                tracing::warn!("Voice connection lost; ending capture session");
                break;
            }
            if let Err(e) = self.iteration().await {
                tracing::error!(error = %e, "Capture iteration failed; continuing");
            }
            tokio::time::sleep(self.config.iteration_pause).await;
        }

        self.active.store(false, Ordering::SeqCst);
        self.set_state(SessionState::Idle);
        tracing::info!("Capture session stopped");
        Ok(())
    }

    /// One Listening → Transcribing → Dispatching pass.
    async fn iteration(&self) -> Result<(), VoiceError> {
        self.set_state(SessionState::Listening);

        let mut sink = BufferSink::new();
        self.source
            .record(&mut sink, self.config.capture_window)
            .await?;
        let captured = Box::new(sink).finalize();

        let speaker = captured.speaker.unwrap_or_else(|| Speaker {
            id: 0,
            name: self.config.default_speaker_name.clone(),
        });

        if captured.data.len() < self.config.min_capture_bytes {
            tracing::debug!(bytes = captured.data.len(), "Capture below minimum size; skipping");
            return Ok(());
        }

        self.set_state(SessionState::Transcribing);
        let transcriber = Arc::clone(&self.transcriber);
        let audio = captured.data;
        let text = tokio::task::spawn_blocking(move || transcriber.transcribe(&audio))
            .await
            .map_err(|e| VoiceError::Transcription(e.to_string()))??;

        let Some(text) = text else {
            tracing::debug!("No usable transcript; listening again");
            return Ok(());
        };
        tracing::info!(speaker = %speaker.name, text = %text, "Utterance recognized");

        // Fire-and-forget: not awaited by the loop; may race with process
        // shutdown.
        if let Some(store) = &self.log_store {
            let store = Arc::clone(store);
            let entry = (speaker.id, speaker.name.clone(), text.clone());
            tokio::spawn(async move {
                if let Err(e) = store.append(entry.0, &entry.1, &entry.2).await {
                    tracing::error!(error = %e, "Voice log write failed");
                }
            });
        }

        self.set_state(SessionState::Dispatching);
        let fragments = self.generator.fragments(&text, &speaker.name);
        let spoken = pipeline::run(
            fragments,
            Arc::clone(&self.synthesizer),
            Arc::clone(&self.sink),
            &speaker.name,
        )
        .await;
        tracing::info!(speaker = %speaker.name, response = %spoken, "Response spoken");

        Ok(())
    }

    fn set_state(&self, new_state: SessionState) {
        let mut state = self.state.lock().unwrap();
        if *state != new_state {
            tracing::debug!(old = ?*state, new = ?new_state, "Session state transition");
            *state = new_state;
        }
    }
}
