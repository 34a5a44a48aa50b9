//! Upstream text generation: NDJSON streaming over an Ollama-compatible
//! chat endpoint.
//!
//! The generator produces a lazy, finite, non-restartable stream of text
//! fragments for one recognized human utterance. Fragments carry no
//! boundary semantics; sentence extraction happens downstream in
//! [`crate::segment`].

use std::pin::Pin;
use std::process::Stdio;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader, Lines};
use tokio::process::{Child, Command};

use crate::config::Config;
use crate::error::VoiceError;

/// A lazy, finite stream of text fragments. May yield one `Err` mid-stream
/// and end; it is never restartable.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, VoiceError>> + Send>>;

/// Upstream conversational text source, keyed by the recognized utterance
/// and the speaker's display name.
pub trait TextGenerator: Send + Sync {
    /// Start one generation and return its fragment stream.
    fn fragments(&self, text: &str, speaker_name: &str) -> FragmentStream;
}

// ── Ollama adapter ─────────────────────────────────────────────────

/// Streaming chat client for an Ollama-compatible endpoint.
pub struct OllamaGenerator {
    /// Shared connection pool; safe for concurrent use.
    http: reqwest::Client,
    base_url: String,
    model: String,
    system_prompt: String,
    temperature: f32,
}

impl OllamaGenerator {
    /// Create a generator sharing the given connection pool.
    #[must_use]
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        Self {
            http,
            base_url: config.llm_url.trim_end_matches('/').to_string(),
            model: config.llm_model.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
        }
    }
}

impl TextGenerator for OllamaGenerator {
    fn fragments(&self, text: &str, speaker_name: &str) -> FragmentStream {
        let http = self.http.clone();
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: build_prompt(text, speaker_name),
                },
            ],
            stream: true,
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        let response = async move {
            let resp = http
                .post(url)
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            Ok::<_, VoiceError>(ndjson_fragments(resp.bytes_stream()))
        };

        Box::pin(stream::once(response).try_flatten())
    }
}

// ── Assistant CLI adapter ──────────────────────────────────────────

/// Streaming text source backed by a local assistant CLI.
///
/// One process is spawned per generation with `--output-format
/// stream-json`, which emits one JSON event per stdout line. Only the
/// first `assistant` event carries the reply; a trailing `result` event
/// is used as a fallback when no assistant text arrived.
pub struct CliGenerator {
    program: String,
    system_prompt: String,
}

impl CliGenerator {
    /// Create a generator spawning the configured executable.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.llm_command.clone(),
            system_prompt: config.system_prompt.clone(),
        }
    }
}

impl TextGenerator for CliGenerator {
    fn fragments(&self, text: &str, speaker_name: &str) -> FragmentStream {
        let program = self.program.clone();
        let system_prompt = self.system_prompt.clone();
        let prompt = build_prompt(text, speaker_name);

        let spawn = async move {
            let mut child = Command::new(&program)
                .arg("-p")
                .arg(&prompt)
                .args(["--output-format", "stream-json", "--verbose"])
                .arg("--system-prompt")
                .arg(&system_prompt)
                .args(["--tools", ""])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    VoiceError::TextGeneration(format!("failed to spawn {program}: {e}"))
                })?;
            let stdout = child.stdout.take().ok_or_else(|| {
                VoiceError::TextGeneration("assistant CLI stdout unavailable".to_string())
            })?;
            Ok::<_, VoiceError>(cli_fragments(BufReader::new(stdout).lines(), child))
        };

        Box::pin(stream::once(spawn).try_flatten())
    }
}

struct CliState<R> {
    lines: Lines<R>,
    /// `None` once the process has been drained; the stream then ends.
    child: Option<Child>,
    yielded: bool,
}

/// Decode the CLI's stream-JSON stdout into content fragments.
///
/// After stdout closes, stderr is logged (truncated) and the exit status
/// is checked; neither surfaces as a stream error because the reply text,
/// if any, has already been yielded.
fn cli_fragments<R>(lines: Lines<R>, child: Child) -> impl Stream<Item = Result<String, VoiceError>> + Send
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let state = CliState {
        lines,
        child: Some(child),
        yielded: false,
    };

    stream::unfold(state, |mut st| async move {
        let Some(child) = st.child.take() else {
            return None;
        };

        loop {
            match st.lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(text) = decode_cli_event(&line, st.yielded) {
                        st.yielded = true;
                        st.child = Some(child);
                        return Some((Ok(text), st));
                    }
                }
                Ok(None) => {
                    drain_cli(child).await;
                    return None;
                }
                Err(e) => {
                    drain_cli(child).await;
                    return Some((Err(VoiceError::Io(e)), st));
                }
            }
        }
    })
}

/// Log leftover stderr and the exit status once stdout is exhausted.
async fn drain_cli(mut child: Child) {
    if let Some(mut stderr) = child.stderr.take() {
        let mut buf = Vec::new();
        if stderr.read_to_end(&mut buf).await.is_ok() && !buf.is_empty() {
            let text = String::from_utf8_lossy(&buf);
            let shown: String = text.chars().take(500).collect();
            tracing::warn!(stderr = %shown, "Assistant CLI wrote to stderr");
        }
    }
    match child.wait().await {
        Ok(status) if !status.success() => {
            tracing::error!(status = %status, "Assistant CLI exited with failure");
        }
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Failed to reap assistant CLI"),
    }
}

/// Parse one stream-JSON event line, returning its reply text.
///
/// Yields at most once per generation: the first `assistant` event's text
/// blocks win; `result` is only consulted when nothing was yielded yet.
fn decode_cli_event(line: &str, already_yielded: bool) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let event: CliEvent = match serde_json::from_str(trimmed) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable CLI event line; skipping");
            return None;
        }
    };
    if already_yielded {
        return None;
    }

    match event.kind.as_str() {
        "assistant" => {
            let text: String = event
                .message
                .map(|m| {
                    m.content
                        .into_iter()
                        .filter(|block| block.kind == "text")
                        .map(|block| block.text)
                        .collect()
                })
                .unwrap_or_default();
            if text.is_empty() { None } else { Some(text) }
        }
        "result" => event.result.filter(|r| !r.is_empty()),
        _ => None,
    }
}

/// Embed the speaker's display name in the user prompt so the model can
/// address them directly.
fn build_prompt(text: &str, speaker_name: &str) -> String {
    format!("【相手の名前: {speaker_name}】\n発言内容: {text}")
}

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// One NDJSON line of a streaming chat response.
#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// One stream-JSON event from the assistant CLI.
#[derive(Deserialize)]
struct CliEvent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: Option<CliEventMessage>,
    #[serde(default)]
    result: Option<String>,
}

#[derive(Deserialize)]
struct CliEventMessage {
    #[serde(default)]
    content: Vec<CliContentBlock>,
}

#[derive(Deserialize)]
struct CliContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

// ── NDJSON decoding ────────────────────────────────────────────────

/// State threaded through the `unfold` stream.
struct NdjsonState<S> {
    stream: S,
    buf: BytesMut,
    done: bool,
}

/// Decode an NDJSON byte stream into content fragments.
///
/// Bytes are buffered until a complete line is available; unparseable
/// lines are skipped with a warning. A transport error ends the stream
/// after yielding exactly one `Err`.
fn ndjson_fragments<S, E>(byte_stream: S) -> impl Stream<Item = Result<String, VoiceError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<VoiceError> + Send,
{
    let state = NdjsonState {
        stream: byte_stream.boxed(),
        buf: BytesMut::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }

        loop {
            // Try to extract a complete line from the buffer.
            if let Some(line_end) = find_newline(&st.buf) {
                let line = st.buf.split_to(line_end);
                if let Some(content) = decode_line(&line) {
                    return Some((Ok(content), st));
                }
                continue;
            }

            // Need more data from upstream.
            match st.stream.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e.into()), st));
                }
                None => {
                    st.done = true;
                    // Flush a trailing line that arrived without a newline.
                    if !st.buf.is_empty() {
                        let len = st.buf.len();
                        let line = st.buf.split_to(len);
                        if let Some(content) = decode_line(&line) {
                            return Some((Ok(content), st));
                        }
                    }
                    return None;
                }
            }
        }
    })
}

/// Parse one NDJSON line, returning its non-empty content fragment.
fn decode_line(line: &[u8]) -> Option<String> {
    let line_str = String::from_utf8_lossy(line);
    let trimmed = line_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<ChatChunk>(trimmed) {
        Ok(chunk) => {
            if chunk.done {
                return None;
            }
            let content = chunk.message.map(|m| m.content).unwrap_or_default();
            if content.is_empty() { None } else { Some(content) }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable NDJSON line; skipping");
            None
        }
    }
}

/// Find the next newline in the buffer, returning the position after it.
fn find_newline(buf: &BytesMut) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n').map(|pos| pos + 1)
}
