//! Voice processing module
//!
//! Handles audio capture, microphone arbitration, speech recognition,
//! synthesis and interruptible playback.

mod capture;
mod microphone;
mod phrases;
mod playback;
mod speech;
mod stt;
mod tts;
mod vad;

pub use capture::{AudioSource, Capture, CpalMicrophone, RawAudio, SAMPLE_RATE, samples_to_wav};
pub use microphone::{MicrophoneArbiter, MicrophoneLease};
pub use phrases::{Intent, PhraseBook};
pub use playback::{AudioSink, Clip, CpalSpeaker, decode_mp3};
pub use speech::{CancellationSignal, Interruption, SpeechOutcome, SpeechOutput, SpeechSettings};
pub use stt::{Transcriber, WhisperTranscriber};
pub(crate) use stt::http_client;
pub use tts::{OpenAiSpeech, Synthesizer};
pub use vad::{DetectorState, UtteranceDetector, VadEvent, VadSettings, calculate_energy};
