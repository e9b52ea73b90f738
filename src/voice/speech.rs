//! Speech output with barge-in
//!
//! `say` synthesizes text, plays it, and runs a barge-in listener for the
//! exact lifetime of the playback. The listener never touches conversation
//! state; it can only trigger the [`CancellationSignal`], which the playback
//! loop polls.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::capture::Capture;
use super::microphone::MicrophoneArbiter;
use super::phrases::PhraseBook;
use super::playback::AudioSink;
use super::stt::Transcriber;
use super::tts::Synthesizer;
use crate::Result;
use crate::config::AudioConfig;

const SIGNAL_CLEAR: u8 = 0;
const SIGNAL_WAKE: u8 = 1;
const SIGNAL_EXIT: u8 = 2;
const SIGNAL_EXTERNAL: u8 = 3;

/// Longest wait for a stopped listener to close the microphone
const LISTENER_GRACE: Duration = Duration::from_secs(1);

/// Why speech was cut short
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// The wake phrase was heard over the speech
    WakePhrase,
    /// An end or terminate phrase was heard over the speech
    ExitPhrase,
    /// Stopped from outside the controller
    External,
}

/// Result of [`SpeechOutput::say`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// Played to the end
    Done,
    /// Stopped early
    Interrupted(Interruption),
}

/// One-shot, re-armable "stop speaking now" flag
///
/// The first trigger wins until the flag is consumed with [`take`](Self::take).
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    reason: Arc<AtomicU8>,
}

impl CancellationSignal {
    /// Create a cleared signal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal; returns false if it was already set
    pub fn trigger(&self, reason: Interruption) -> bool {
        let value = match reason {
            Interruption::WakePhrase => SIGNAL_WAKE,
            Interruption::ExitPhrase => SIGNAL_EXIT,
            Interruption::External => SIGNAL_EXTERNAL,
        };
        self.reason
            .compare_exchange(SIGNAL_CLEAR, value, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Consume the signal, re-arming it
    pub fn take(&self) -> Option<Interruption> {
        match self.reason.swap(SIGNAL_CLEAR, Ordering::SeqCst) {
            SIGNAL_WAKE => Some(Interruption::WakePhrase),
            SIGNAL_EXIT => Some(Interruption::ExitPhrase),
            SIGNAL_EXTERNAL => Some(Interruption::External),
            _ => None,
        }
    }

    /// Whether the signal is set
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.reason.load(Ordering::SeqCst) != SIGNAL_CLEAR
    }
}

/// Timing for speech playback and the barge-in listener
#[derive(Debug, Clone, Copy)]
pub struct SpeechSettings {
    /// Per-capture timeout of the barge-in listener
    pub barge_in_timeout: Duration,
    /// Longest barge-in phrase captured
    pub barge_in_phrase_limit: Duration,
    /// Interval at which playback checks for cancellation
    pub playback_poll: Duration,
    /// Longest wait for a stopped listener to close the microphone
    pub listener_grace: Duration,
}

impl SpeechSettings {
    /// Derive from audio settings
    #[must_use]
    pub const fn new(audio: &AudioConfig) -> Self {
        Self {
            barge_in_timeout: audio.barge_in_timeout,
            barge_in_phrase_limit: audio.barge_in_phrase_limit,
            playback_poll: audio.playback_poll,
            listener_grace: LISTENER_GRACE,
        }
    }
}

/// What the barge-in listener needs, shared with its task
#[derive(Clone)]
struct BargeIn {
    microphone: Arc<MicrophoneArbiter>,
    transcriber: Arc<dyn Transcriber>,
    phrases: Arc<PhraseBook>,
    settings: SpeechSettings,
}

/// Speech-output controller
pub struct SpeechOutput {
    synthesizer: Arc<dyn Synthesizer>,
    sink: Box<dyn AudioSink>,
    barge_in: BargeIn,
    signal: CancellationSignal,
}

impl SpeechOutput {
    /// Create a controller
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        transcriber: Arc<dyn Transcriber>,
        microphone: Arc<MicrophoneArbiter>,
        sink: Box<dyn AudioSink>,
        phrases: Arc<PhraseBook>,
        settings: SpeechSettings,
    ) -> Self {
        Self {
            synthesizer,
            sink,
            barge_in: BargeIn {
                microphone,
                transcriber,
                phrases,
                settings,
            },
            signal: CancellationSignal::new(),
        }
    }

    /// Handle for stopping speech from outside
    #[must_use]
    pub fn cancel_signal(&self) -> CancellationSignal {
        self.signal.clone()
    }

    /// Speak `text`, listening for barge-in while it plays
    ///
    /// # Errors
    ///
    /// Returns `Error::Tts`/`Error::Http` if synthesis fails and
    /// `Error::Io`/`Error::Audio`/`Error::Device` if playback cannot start
    pub async fn say(&mut self, text: &str) -> Result<SpeechOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SpeechOutcome::Done);
        }

        // A trigger left over from a previous utterance does not apply here
        if let Some(stale) = self.signal.take() {
            tracing::debug!(reason = ?stale, "discarding stale cancellation");
        }

        tracing::info!(text = %text, "speaking");
        let audio = self.synthesizer.synthesize(text).await?;

        // Removed when dropped, on every return path below
        let mut file = tempfile::Builder::new()
            .prefix("peepers-")
            .suffix(".mp3")
            .tempfile()?;
        file.write_all(&audio)?;
        file.flush()?;

        self.sink.load(file.path())?;
        self.sink.play()?;

        // Cancelled on drop, so a dropped `say` also stops the listener
        let listening = CancellationToken::new();
        let listener = tokio::spawn(listen_for_barge_in(
            self.barge_in.clone(),
            listening.clone(),
            self.signal.clone(),
        ));
        let listening = listening.drop_guard();

        let outcome = self.wait_for_playback().await;

        drop(listening);
        self.join_listener(listener).await;

        // Playback already finished; a trigger that raced its end has nothing to stop
        if outcome == SpeechOutcome::Done {
            self.signal.take();
        }

        tracing::debug!(outcome = ?outcome, "speech finished");
        drop(file);
        Ok(outcome)
    }

    /// Stop any playback immediately
    pub fn stop(&mut self) {
        self.sink.stop();
    }

    async fn wait_for_playback(&mut self) -> SpeechOutcome {
        loop {
            if let Some(reason) = self.signal.take() {
                self.sink.stop();
                tracing::info!(reason = ?reason, "speech interrupted");
                return SpeechOutcome::Interrupted(reason);
            }
            if !self.sink.is_busy() {
                return SpeechOutcome::Done;
            }
            tokio::time::sleep(self.barge_in.settings.playback_poll).await;
        }
    }

    async fn join_listener(&self, mut listener: JoinHandle<()>) {
        let grace = self.barge_in.settings.listener_grace;
        match tokio::time::timeout(grace, &mut listener).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "barge-in listener failed"),
            Err(_) => {
                // Already told to stop; only a wedged device gets here
                tracing::warn!(?grace, "barge-in listener did not stop, aborting");
                listener.abort();
            }
        }
    }
}

/// Short captures until `stop` fires or a control phrase is heard
///
/// Both the capture and the transcription give way to `stop`, so the
/// listener exits promptly once playback ends.
async fn listen_for_barge_in(ctx: BargeIn, stop: CancellationToken, signal: CancellationSignal) {
    let BargeIn {
        microphone,
        transcriber,
        phrases,
        settings,
    } = ctx;

    while !stop.is_cancelled() {
        let capture = match microphone
            .capture_until(settings.barge_in_timeout, settings.barge_in_phrase_limit, &stop)
            .await
        {
            Ok(capture) => capture,
            Err(e) => {
                tracing::warn!(error = %e, "barge-in capture failed");
                return;
            }
        };

        let Capture::Audio(audio) = capture else {
            continue;
        };

        let transcribed = tokio::select! {
            biased;
            () = stop.cancelled() => return,
            result = transcriber.transcribe(&audio) => result,
        };
        let transcript = match transcribed {
            Ok(Some(text)) => text,
            Ok(None) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "barge-in transcription failed");
                continue;
            }
        };

        if stop.is_cancelled() {
            return;
        }

        let reason = if phrases.is_exit(&transcript) {
            Interruption::ExitPhrase
        } else if phrases.is_wake(&transcript) {
            Interruption::WakePhrase
        } else {
            tracing::trace!(transcript = %transcript, "ignoring speech during playback");
            continue;
        };

        tracing::info!(transcript = %transcript, reason = ?reason, "barge-in detected");
        signal.trigger(reason);
        return;
    }
}
