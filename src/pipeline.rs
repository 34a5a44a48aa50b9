//! Ordered streaming synthesis pipeline.
//!
//! One pipeline run joins a fragment stream to the playback sink:
//!
//! ```text
//!   fragments ─→ segmenter ─→ spawn synthesis ──→ handle queue (FIFO)
//!                                   (parallel)          │
//!                                                    feeder  awaits each
//!                                                       │    handle in order
//!                                                 playback queue
//!                                                       │
//!                                                    player  one utterance
//!                                                       │    at a time
//!                                                  output sink
//! ```
//!
//! Synthesis calls run fully in parallel, but the feeder consumes their
//! handles strictly in submission order, so playback order always equals
//! utterance emission order no matter which synthesis finishes first.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio_io::AudioSink;
use crate::error::VoiceError;
use crate::segment::SentenceSegmenter;
use crate::tts::Synthesizer;

/// Interval at which the player polls the sink for playback completion.
const PLAYBACK_POLL: Duration = Duration::from_millis(50);

/// One in-flight synthesis; `None` audio means the utterance failed.
type SynthesisHandle = JoinHandle<Option<Vec<u8>>>;

/// The utterance spoken instead of a response when the text generator
/// fails mid-stream, addressed to the speaker so the failure is audible.
#[must_use]
pub fn fallback_utterance(speaker_name: &str) -> String {
    format!("{speaker_name}さん、ごめんなさい。エラーが発生したため、お返事できません。")
}

/// Run one end-to-end pipeline for a single recognized human utterance.
///
/// Drives the segmenter over `fragments`, dispatching every complete
/// utterance to `synthesizer` without waiting for completion, and plays
/// the results on `sink` in emission order. A mid-stream generation
/// failure substitutes exactly one fallback utterance; a failed synthesis
/// is skipped silently. Returns only after the feeder and player have
/// drained the terminating sentinel.
///
/// Returns the full text spoken (or the fallback text) for observability.
/// No failure below the run level escapes this function.
pub async fn run<S>(
    fragments: S,
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    speaker_name: &str,
) -> String
where
    S: Stream<Item = Result<String, VoiceError>> + Send,
{
    // Slot `None` is the terminating sentinel on both queues.
    let (handle_tx, handle_rx) = mpsc::unbounded_channel::<Option<SynthesisHandle>>();
    let (audio_tx, audio_rx) = mpsc::unbounded_channel::<Option<Vec<u8>>>();

    let feeder = tokio::spawn(feed(handle_rx, audio_tx));
    let player = tokio::spawn(play(audio_rx, Arc::clone(&sink)));

    let mut segmenter = SentenceSegmenter::new();
    let mut spoken: Vec<String> = Vec::new();
    let mut generation_failed = false;

    tokio::pin!(fragments);
    while let Some(item) = fragments.next().await {
        match item {
            Ok(fragment) => {
                for utterance in segmenter.push(&fragment) {
                    tracing::debug!(text = %utterance, "Utterance dispatched");
                    dispatch(&handle_tx, &synthesizer, utterance.clone());
                    spoken.push(utterance);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, speaker = speaker_name, "Text generation failed mid-stream");
                generation_failed = true;
                break;
            }
        }
    }

    if generation_failed {
        let apology = fallback_utterance(speaker_name);
        dispatch(&handle_tx, &synthesizer, apology.clone());
        spoken = vec![apology];
    } else if let Some(residue) = segmenter.finish() {
        tracing::debug!(text = %residue, "Utterance dispatched");
        dispatch(&handle_tx, &synthesizer, residue.clone());
        spoken.push(residue);
    }

    // Terminate: sentinel after the last real handle, then drain both tasks.
    let _ = handle_tx.send(None);
    drop(handle_tx);

    if let Err(e) = feeder.await {
        tracing::error!(error = %e, "Feeder task aborted");
    }
    if let Err(e) = player.await {
        tracing::error!(error = %e, "Player task aborted");
    }

    let text = spoken.concat();
    tracing::info!(chars = text.chars().count(), "Pipeline run complete");
    text
}

/// Start synthesis for one utterance and queue its handle.
///
/// Submission order equals queue order equals emission order; the call
/// itself runs concurrently with everything else.
fn dispatch(
    handle_tx: &mpsc::UnboundedSender<Option<SynthesisHandle>>,
    synthesizer: &Arc<dyn Synthesizer>,
    text: String,
) {
    let synthesizer = Arc::clone(synthesizer);
    let handle = tokio::spawn(async move { synthesizer.synthesize(&text).await });
    let _ = handle_tx.send(Some(handle));
}

/// Feeder: the single consumer that re-serializes out-of-order completions.
///
/// Pops one handle at a time and blocks on *that* handle even when a
/// later-queued one has already resolved. Failed or panicked synthesis is
/// skipped without surfacing an error. The sentinel is forwarded to the
/// playback queue on exit.
async fn feed(
    mut handle_rx: mpsc::UnboundedReceiver<Option<SynthesisHandle>>,
    audio_tx: mpsc::UnboundedSender<Option<Vec<u8>>>,
) {
    while let Some(slot) = handle_rx.recv().await {
        let Some(handle) = slot else { break };
        match handle.await {
            Ok(Some(audio)) => {
                let _ = audio_tx.send(Some(audio));
            }
            Ok(None) => {
                // Synthesis already logged the failure; skip the utterance.
            }
            Err(e) => {
                tracing::warn!(error = %e, "Synthesis task panicked; skipping utterance");
            }
        }
    }
    let _ = audio_tx.send(None);
}

/// Player: drives the sink strictly sequentially.
///
/// One utterance is fully played out before the next is submitted. Items
/// arriving while the sink is disconnected are dropped silently.
async fn play(mut audio_rx: mpsc::UnboundedReceiver<Option<Vec<u8>>>, sink: Arc<dyn AudioSink>) {
    while let Some(slot) = audio_rx.recv().await {
        let Some(audio) = slot else { break };

        if !sink.is_connected() {
            tracing::debug!("Output sink not connected; dropping utterance audio");
            continue;
        }
        if let Err(e) = sink.play(audio).await {
            tracing::warn!(error = %e, "Playback failed; skipping utterance");
            continue;
        }
        while sink.is_playing() {
            tokio::time::sleep(PLAYBACK_POLL).await;
        }
    }
}
