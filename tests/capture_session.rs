//! Capture loop tests with scripted audio sources and mock collaborators.
//!
//! A shared event log records generator starts and sink plays so tests can
//! assert how the loop interleaves (or refuses to interleave) pipeline runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;

use koebot::error::VoiceError;
use koebot::llm::FragmentStream;
use koebot::{
    AudioSink, AudioSource, CaptureSession, CaptureSink, SessionConfig, Speaker, Synthesizer,
    TextGenerator, Transcriber,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    RunStarted,
    Played,
}

type EventLog = Arc<Mutex<Vec<Event>>>;

/// Source that replays a scripted queue of capture buffers, then reports
/// the connection as lost so the loop ends on its own.
struct ScriptedSource {
    buffers: Mutex<VecDeque<Vec<u8>>>,
    speaker: Speaker,
}

impl ScriptedSource {
    fn new(capture_sizes: &[usize]) -> Self {
        Self {
            buffers: Mutex::new(capture_sizes.iter().map(|&n| vec![0u8; n]).collect()),
            speaker: Speaker {
                id: 5,
                name: "たろう".to_string(),
            },
        }
    }
}

#[async_trait]
impl AudioSource for ScriptedSource {
    fn is_connected(&self) -> bool {
        !self.buffers.lock().unwrap().is_empty()
    }

    async fn record(
        &self,
        sink: &mut dyn CaptureSink,
        _window: Duration,
    ) -> Result<(), VoiceError> {
        if let Some(buffer) = self.buffers.lock().unwrap().pop_front() {
            sink.write(&self.speaker, &buffer);
        }
        Ok(())
    }
}

/// Source that stays connected and captures silence forever; only a stop
/// trigger ends a loop running against it.
struct EndlessSource;

#[async_trait]
impl AudioSource for EndlessSource {
    fn is_connected(&self) -> bool {
        true
    }

    async fn record(
        &self,
        sink: &mut dyn CaptureSink,
        _window: Duration,
    ) -> Result<(), VoiceError> {
        let speaker = Speaker {
            id: 1,
            name: "x".to_string(),
        };
        sink.write(&speaker, &[0u8; 4]);
        Ok(())
    }
}

struct CountingTranscriber {
    calls: AtomicUsize,
    responses: Mutex<VecDeque<Option<String>>>,
}

impl CountingTranscriber {
    fn with_responses(responses: &[Option<&str>]) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            responses: Mutex::new(
                responses
                    .iter()
                    .map(|r| r.map(ToString::to_string))
                    .collect(),
            ),
        }
    }
}

impl Transcriber for CountingTranscriber {
    fn transcribe(&self, _audio: &[u8]) -> Result<Option<String>, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| Some("こんにちは。".to_string())))
    }
}

/// Generator producing one short scripted reply per call, recording each
/// call in the event log.
struct MockGenerator {
    events: EventLog,
    speaker_names: Mutex<Vec<String>>,
}

impl MockGenerator {
    fn new(events: EventLog) -> Self {
        Self {
            events,
            speaker_names: Mutex::new(Vec::new()),
        }
    }
}

impl TextGenerator for MockGenerator {
    fn fragments(&self, _text: &str, speaker_name: &str) -> FragmentStream {
        self.events.lock().unwrap().push(Event::RunStarted);
        self.speaker_names
            .lock()
            .unwrap()
            .push(speaker_name.to_string());
        Box::pin(stream::iter(vec![Ok("了解です。".to_string())]))
    }
}

struct EchoSynth;

#[async_trait]
impl Synthesizer for EchoSynth {
    async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        Some(text.as_bytes().to_vec())
    }
}

struct EventSink {
    events: EventLog,
}

#[async_trait]
impl AudioSink for EventSink {
    fn is_connected(&self) -> bool {
        true
    }

    async fn play(&self, _audio: Vec<u8>) -> Result<(), VoiceError> {
        self.events.lock().unwrap().push(Event::Played);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        false
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        capture_window: Duration::from_millis(1),
        min_capture_bytes: 100,
        iteration_pause: Duration::from_millis(1),
        ..SessionConfig::default()
    }
}

fn session_with(
    source: Arc<dyn AudioSource>,
    transcriber: Arc<dyn Transcriber>,
    events: &EventLog,
) -> CaptureSession {
    CaptureSession::new(
        source,
        Arc::new(EventSink {
            events: Arc::clone(events),
        }),
        transcriber,
        Arc::new(EchoSynth),
        Arc::new(MockGenerator::new(Arc::clone(events))),
        None,
        fast_config(),
    )
}

#[tokio::test]
async fn small_captures_never_reach_the_transcriber() {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let transcriber = Arc::new(CountingTranscriber::with_responses(&[]));
    let source = Arc::new(ScriptedSource::new(&[10, 20]));

    let session = session_with(source, transcriber.clone(), &events);
    session.run().await.unwrap();

    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 0);
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn pipeline_runs_never_overlap() {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let transcriber = Arc::new(CountingTranscriber::with_responses(&[]));
    let source = Arc::new(ScriptedSource::new(&[2000, 2000]));

    let session = session_with(source, transcriber, &events);
    session.run().await.unwrap();

    // Each run fully drains (RunStarted then Played) before the next
    // capture begins.
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            Event::RunStarted,
            Event::Played,
            Event::RunStarted,
            Event::Played
        ]
    );
}

#[tokio::test]
async fn filtered_transcript_skips_generation() {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let transcriber = Arc::new(CountingTranscriber::with_responses(&[None]));
    let source = Arc::new(ScriptedSource::new(&[2000]));

    let session = session_with(source, transcriber.clone(), &events);
    session.run().await.unwrap();

    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn speaker_name_flows_into_generation() {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let generator = Arc::new(MockGenerator::new(Arc::clone(&events)));
    let session = CaptureSession::new(
        Arc::new(ScriptedSource::new(&[2000])),
        Arc::new(EventSink {
            events: Arc::clone(&events),
        }),
        Arc::new(CountingTranscriber::with_responses(&[])),
        Arc::new(EchoSynth),
        generator.clone(),
        None,
        fast_config(),
    );
    session.run().await.unwrap();

    assert_eq!(*generator.speaker_names.lock().unwrap(), vec!["たろう"]);
}

#[tokio::test]
async fn stop_trigger_ends_the_loop() {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let transcriber = Arc::new(CountingTranscriber::with_responses(&[]));
    let session = Arc::new(session_with(Arc::new(EndlessSource), transcriber, &events));

    let runner = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.run().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(session.is_active());
    session.stop();

    tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .expect("loop did not stop")
        .unwrap()
        .unwrap();
    assert!(!session.is_active());
}

#[tokio::test]
async fn concurrent_run_is_rejected() {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let transcriber = Arc::new(CountingTranscriber::with_responses(&[]));
    let session = Arc::new(session_with(Arc::new(EndlessSource), transcriber, &events));

    let runner = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.run().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = session.run().await;
    assert!(matches!(second, Err(VoiceError::AlreadyActive)));

    session.stop();
    tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .expect("loop did not stop")
        .unwrap()
        .unwrap();
}
