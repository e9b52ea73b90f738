//! Shared test utilities
//!
//! In-memory stand-ins for the servo bus, microphone, speaker and the
//! remote services. Captured "audio" carries its transcript as sample
//! values so the fake transcriber can read it back.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use peepers::chat::{ChatMessage, ChatModel};
use peepers::config::{Config, EyeConfig};
use peepers::voice::{
    AudioSink, AudioSource, Capture, MicrophoneArbiter, PhraseBook, RawAudio, SpeechOutput,
    SpeechSettings, Synthesizer, Transcriber,
};
use peepers::{Conversation, Error, Eyes, RegisterBus, Result, ServoDriver};

/// Transcript that makes the fake transcriber fail
pub const STT_FAILURE: &str = "<stt failure>";

/// Time the fake microphone takes to "hear" a scripted phrase
pub const PHRASE_TIME: Duration = Duration::from_millis(100);

// ── Servo bus ─────────────────────────────────────────────────────

/// Register writes recorded by [`RecordingBus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Write {
    pub at: Instant,
    pub register: u8,
    pub value: u8,
}

/// Bus that records every write and can be told to fail
#[derive(Clone, Default)]
pub struct RecordingBus {
    pub writes: Arc<Mutex<Vec<Write>>>,
    pub fail: Arc<AtomicBool>,
}

impl RegisterBus for RecordingBus {
    fn write_register(&self, register: u8, value: u8) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Bus("injected failure".to_string()));
        }
        self.writes.lock().unwrap().push(Write {
            at: Instant::now(),
            register,
            value,
        });
        Ok(())
    }

    fn read_register(&self, _register: u8) -> Result<u8> {
        Ok(0x00)
    }
}

impl RecordingBus {
    /// Number of writes so far
    pub fn count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    /// Off-counter values written to `channel`, in order
    pub fn off_ticks(&self, channel: u8) -> Vec<u16> {
        let off_l = 0x06 + 4 * channel + 2;
        let writes = self.writes.lock().unwrap();
        writes
            .windows(2)
            .filter(|w| w[0].register == off_l && w[1].register == off_l + 1)
            .map(|w| u16::from_le_bytes([w[0].value, w[1].value]))
            .collect()
    }

    /// Positions of writes to `channel` at or after write number `from`
    pub fn write_indices(&self, channel: u8, from: usize) -> Vec<usize> {
        let base = 0x06 + 4 * channel;
        let writes = self.writes.lock().unwrap();
        writes
            .iter()
            .enumerate()
            .skip(from)
            .filter(|(_, w)| (base..base + 4).contains(&w.register))
            .map(|(i, _)| i)
            .collect()
    }

    /// Channels written since write number `from`
    pub fn channels_since(&self, from: usize) -> Vec<u8> {
        let writes = self.writes.lock().unwrap();
        let mut channels: Vec<u8> = writes[from..]
            .iter()
            .filter(|w| w.register >= 0x06)
            .map(|w| (w.register - 0x06) / 4)
            .collect();
        channels.dedup();
        channels
    }
}

/// Eye settings with blinking disabled so lid positions are predictable
pub fn quiet_eyes() -> EyeConfig {
    EyeConfig {
        blink_chance: 0.0,
        ..EyeConfig::default()
    }
}

/// A driver on a recording bus
pub fn servo_driver() -> (Arc<ServoDriver>, RecordingBus) {
    let bus = RecordingBus::default();
    let driver = ServoDriver::new(Box::new(bus.clone()), 50.0).unwrap();
    (Arc::new(driver), bus)
}

// ── Microphone ────────────────────────────────────────────────────

/// Fake audio carrying `text`
pub fn speech(text: &str) -> RawAudio {
    RawAudio {
        samples: text.bytes().map(f32::from).collect(),
        sample_rate: 16_000,
    }
}

/// Microphone that hears a scripted list of phrases
///
/// `None` entries and an empty script behave as silence: the capture waits
/// out its timeout and returns `TimedOut`. A cancelled capture returns
/// `TimedOut` at once, dropping the phrase it was hearing.
#[derive(Clone, Default)]
pub struct ScriptedMicrophone {
    pub script: Arc<Mutex<VecDeque<Option<String>>>>,
    pub listens: Arc<AtomicUsize>,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
}

impl ScriptedMicrophone {
    pub fn new<'a>(phrases: impl IntoIterator<Item = &'a str>) -> Self {
        let mic = Self::default();
        mic.push_all(phrases);
        mic
    }

    pub fn push_all<'a>(&self, phrases: impl IntoIterator<Item = &'a str>) {
        self.script
            .lock()
            .unwrap()
            .extend(phrases.into_iter().map(|p| Some(p.to_string())));
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl AudioSource for ScriptedMicrophone {
    async fn listen(
        &mut self,
        timeout: Duration,
        _phrase_limit: Duration,
        cancel: &CancellationToken,
    ) -> Result<Capture> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.listens.fetch_add(1, Ordering::SeqCst);

        let next = self.script.lock().unwrap().pop_front().flatten();
        let (wait, heard) = match next {
            Some(text) => (PHRASE_TIME.min(timeout), Capture::Audio(speech(&text))),
            None => (timeout, Capture::TimedOut),
        };
        let capture = tokio::select! {
            () = cancel.cancelled() => Capture::TimedOut,
            () = tokio::time::sleep(wait) => heard,
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(capture)
    }
}

// ── Services ──────────────────────────────────────────────────────

/// Reads back the text carried by [`speech`] after `delay`
#[derive(Default)]
pub struct EchoTranscriber {
    pub delay: Duration,
}

#[async_trait]
impl Transcriber for EchoTranscriber {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    async fn transcribe(&self, audio: &RawAudio) -> Result<Option<String>> {
        tokio::time::sleep(self.delay).await;
        let text: String = audio.samples.iter().map(|&s| char::from(s as u8)).collect();
        if text == STT_FAILURE {
            return Err(Error::Stt("injected failure".to_string()));
        }
        Ok(Some(text).filter(|t| !t.trim().is_empty()))
    }
}

/// Synthesizer that records what it was asked to say
#[derive(Clone, Default)]
pub struct RecordingSynthesizer {
    pub spoken: Arc<Mutex<Vec<String>>>,
    pub fail: Arc<AtomicBool>,
}

impl RecordingSynthesizer {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Tts("injected failure".to_string()));
        }
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(b"ID3 fake mp3".to_vec())
    }
}

/// Chat model that records each request and replies with a fixed text
#[derive(Clone)]
pub struct RecordingChat {
    pub calls: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    pub reply: String,
    pub fail: Arc<AtomicBool>,
}

impl Default for RecordingChat {
    fn default() -> Self {
        Self {
            calls: Arc::default(),
            reply: "Sure thing.".to_string(),
            fail: Arc::default(),
        }
    }
}

impl RecordingChat {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for RecordingChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Chat("injected failure".to_string()));
        }
        Ok(self.reply.clone())
    }
}

// ── Speaker ───────────────────────────────────────────────────────

/// What the fake speaker saw
#[derive(Debug, Default)]
pub struct SinkLog {
    pub loaded: Vec<PathBuf>,
    pub existed_on_load: Vec<bool>,
    pub plays: usize,
    pub stops: Vec<Instant>,
    pub busy_until: Option<Instant>,
}

/// Speaker whose clips "play" for a fixed virtual duration
#[derive(Clone)]
pub struct FakeSpeaker {
    pub log: Arc<Mutex<SinkLog>>,
    pub play_for: Duration,
}

impl FakeSpeaker {
    pub fn new(play_for: Duration) -> Self {
        Self {
            log: Arc::default(),
            play_for,
        }
    }

    pub fn loaded(&self) -> Vec<PathBuf> {
        self.log.lock().unwrap().loaded.clone()
    }

    pub fn stops(&self) -> Vec<Instant> {
        self.log.lock().unwrap().stops.clone()
    }
}

impl AudioSink for FakeSpeaker {
    fn load(&mut self, path: &Path) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.loaded.push(path.to_path_buf());
        log.existed_on_load.push(path.exists());
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.plays += 1;
        log.busy_until = Some(Instant::now() + self.play_for);
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.log
            .lock()
            .unwrap()
            .busy_until
            .is_some_and(|until| Instant::now() < until)
    }

    fn stop(&mut self) {
        let mut log = self.log.lock().unwrap();
        if log.busy_until.take().is_some() {
            log.stops.push(Instant::now());
        }
    }
}

// ── Assembly ──────────────────────────────────────────────────────

/// Everything a test may want to inspect after driving a conversation
pub struct Rig {
    pub config: Config,
    pub bus: RecordingBus,
    pub driver: Arc<ServoDriver>,
    pub microphone: ScriptedMicrophone,
    pub arbiter: Arc<MicrophoneArbiter>,
    pub synthesizer: RecordingSynthesizer,
    pub chat: RecordingChat,
    pub speaker: FakeSpeaker,
    /// How long each transcription takes
    pub transcribe_delay: Duration,
}

impl Rig {
    /// Fakes around `config`; speech plays for `play_for`
    pub fn new(mut config: Config, play_for: Duration) -> Self {
        config.eyes.blink_chance = 0.0;
        let (driver, bus) = servo_driver();
        let microphone = ScriptedMicrophone::default();
        let arbiter = Arc::new(MicrophoneArbiter::new(Box::new(microphone.clone())));

        Self {
            config,
            bus,
            driver,
            microphone,
            arbiter,
            synthesizer: RecordingSynthesizer::default(),
            chat: RecordingChat::default(),
            speaker: FakeSpeaker::new(play_for),
            transcribe_delay: Duration::ZERO,
        }
    }

    /// A speech controller over the shared fakes
    pub fn speech(&self) -> SpeechOutput {
        SpeechOutput::new(
            Arc::new(self.synthesizer.clone()),
            Arc::new(EchoTranscriber {
                delay: self.transcribe_delay,
            }),
            Arc::clone(&self.arbiter),
            Box::new(self.speaker.clone()),
            Arc::new(PhraseBook::new(&self.config.conversation)),
            SpeechSettings::new(&self.config.audio),
        )
    }

    /// A conversation over the shared fakes
    pub fn conversation(&self) -> Conversation {
        Conversation::new(
            &self.config,
            Eyes::new(Arc::clone(&self.driver), self.config.eyes.clone()),
            self.speech(),
            Arc::clone(&self.arbiter),
            Arc::new(EchoTranscriber {
                delay: self.transcribe_delay,
            }),
            Arc::new(self.chat.clone()),
        )
    }

    /// Last commanded angle of a channel
    pub fn angle(&self, channel: u8) -> Option<f64> {
        self.driver.angle(channel)
    }

    /// Whether both lids are at their closed angles
    pub fn lids_closed(&self) -> bool {
        let eyes = &self.config.eyes;
        self.angle(eyes.upper_lid.channel) == Some(eyes.upper_lid.closed)
            && self.angle(eyes.lower_lid.channel) == Some(eyes.lower_lid.closed)
    }

    /// Whether both lids are at their open angles
    pub fn lids_open(&self) -> bool {
        let eyes = &self.config.eyes;
        self.angle(eyes.upper_lid.channel) == Some(eyes.upper_lid.open)
            && self.angle(eyes.lower_lid.channel) == Some(eyes.lower_lid.open)
    }
}
