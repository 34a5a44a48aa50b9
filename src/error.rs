//! Voice session error types.

/// Errors that can occur in the voice conversation core.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// A capture session is already running for this connection.
    #[error("Capture session is already active")]
    AlreadyActive,

    /// Audio capture failed.
    #[error("Audio capture failed: {0}")]
    Capture(String),

    /// Speech-to-text failed.
    #[error("Transcription failed: {0}")]
    Transcription(String),

    /// Speech synthesis failed.
    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    /// The upstream text generator failed.
    #[error("Text generation failed: {0}")]
    TextGeneration(String),

    /// Audio playback failed.
    #[error("Audio playback failed: {0}")]
    Playback(String),

    /// HTTP error talking to the synthesis or generation service.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Voice log persistence error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (database path, model files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
