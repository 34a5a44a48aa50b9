//! Runtime configuration, loaded from the environment.
//!
//! Every knob has a working default so a bare `Config::default()` talks to a
//! local VOICEVOX engine and a local Ollama server. `from_env` overrides
//! individual fields through `KOEBOT_*` variables, reading a `.env` file
//! first when one is present.

use std::path::PathBuf;
use std::time::Duration;

use crate::session::SessionConfig;

const DEFAULT_SYSTEM_PROMPT: &str = "あなたは音声チャットのアシスタントです。\
短く、親しみやすい日本語で答えてください。";

/// Top-level runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// VOICEVOX-compatible synthesis engine base URL.
    pub synthesis_url: String,
    /// Engine speaker (voice) id.
    pub synthesis_voice: u32,
    /// Playback speed multiplier applied to every synthesis request.
    pub synthesis_speed: f32,
    /// Ollama-compatible chat endpoint base URL.
    pub llm_url: String,
    pub llm_model: String,
    /// Executable spawned by the CLI text-generation backend.
    pub llm_command: String,
    pub system_prompt: String,
    pub temperature: f32,
    /// Path of the voice log database.
    pub db_path: PathBuf,
    /// How long each capture window stays open.
    pub capture_window: Duration,
    /// Captures smaller than this are discarded without transcription.
    pub min_capture_bytes: usize,
    /// Name used when the capture carries no speaker identity.
    pub default_speaker_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            synthesis_url: "http://127.0.0.1:50021".into(),
            synthesis_voice: 3,
            synthesis_speed: 1.05,
            llm_url: "http://127.0.0.1:11434".into(),
            llm_model: "llama3:8b".into(),
            llm_command: "claude".into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            temperature: 0.7,
            db_path: PathBuf::from("voice_history.db"),
            capture_window: Duration::from_secs(3),
            min_capture_bytes: 1000,
            default_speaker_name: "名無しさん".into(),
        }
    }
}

impl Config {
    /// Build a configuration from the process environment, falling back to
    /// defaults for anything unset. Loads `.env` if present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Self {
            synthesis_url: env_or("KOEBOT_SYNTHESIS_URL", defaults.synthesis_url),
            synthesis_voice: env_parse("KOEBOT_SYNTHESIS_VOICE", defaults.synthesis_voice),
            synthesis_speed: env_parse("KOEBOT_SYNTHESIS_SPEED", defaults.synthesis_speed),
            llm_url: env_or("KOEBOT_LLM_URL", defaults.llm_url),
            llm_model: env_or("KOEBOT_LLM_MODEL", defaults.llm_model),
            llm_command: env_or("KOEBOT_LLM_COMMAND", defaults.llm_command),
            system_prompt: env_or("KOEBOT_SYSTEM_PROMPT", defaults.system_prompt),
            temperature: env_parse("KOEBOT_TEMPERATURE", defaults.temperature),
            db_path: std::env::var("KOEBOT_DB_PATH")
                .map_or(defaults.db_path, PathBuf::from),
            capture_window: Duration::from_millis(env_parse(
                "KOEBOT_CAPTURE_WINDOW_MS",
                defaults.capture_window.as_millis() as u64,
            )),
            min_capture_bytes: env_parse("KOEBOT_MIN_CAPTURE_BYTES", defaults.min_capture_bytes),
            default_speaker_name: env_or(
                "KOEBOT_DEFAULT_SPEAKER_NAME",
                defaults.default_speaker_name,
            ),
        }
    }

    /// The session-loop slice of this configuration.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            capture_window: self.capture_window,
            min_capture_bytes: self.min_capture_bytes,
            default_speaker_name: self.default_speaker_name.clone(),
            ..SessionConfig::default()
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_engines() {
        let config = Config::default();
        assert_eq!(config.synthesis_url, "http://127.0.0.1:50021");
        assert_eq!(config.llm_url, "http://127.0.0.1:11434");
        assert_eq!(config.llm_command, "claude");
        assert_eq!(config.capture_window, Duration::from_secs(3));
        assert_eq!(config.min_capture_bytes, 1000);
    }

    #[test]
    fn session_slice_carries_capture_settings() {
        let config = Config {
            capture_window: Duration::from_secs(5),
            min_capture_bytes: 2048,
            ..Config::default()
        };
        let session = config.session();
        assert_eq!(session.capture_window, Duration::from_secs(5));
        assert_eq!(session.min_capture_bytes, 2048);
        assert_eq!(session.default_speaker_name, "名無しさん");
    }
}
