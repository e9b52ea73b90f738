//! Energy-based utterance segmentation
//!
//! Each capture first measures ambient energy for a short window and raises
//! the speech threshold above it, then waits for speech to start. An
//! utterance ends after trailing silence or at the phrase limit. If speech
//! never starts within the timeout the capture times out.

use std::time::Duration;

/// Minimum duration of speech to accept an utterance (in samples at 16kHz)
const MIN_SPEECH_SECS: f64 = 0.3;

/// Speech threshold relative to ambient energy
const AMBIENT_MULTIPLIER: f32 = 1.5;

/// Segmentation timing for one capture
#[derive(Debug, Clone, Copy)]
pub struct VadSettings {
    /// Minimum RMS energy considered speech
    pub energy_threshold: f32,
    /// Ambient calibration window
    pub ambient_window: Duration,
    /// Silence that ends an utterance
    pub trailing_silence: Duration,
    /// How long to wait for speech to start
    pub timeout: Duration,
    /// Longest utterance returned
    pub phrase_limit: Duration,
}

/// State of the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Measuring background noise
    Calibrating,
    /// Waiting for speech
    Waiting,
    /// Speech started, accumulating
    Speaking,
}

/// Result of feeding a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Keep feeding
    Pending,
    /// An utterance is ready in the buffer
    Utterance,
    /// No speech started within the timeout
    TimedOut,
}

/// Segments one utterance out of a sample stream
pub struct UtteranceDetector {
    state: DetectorState,
    threshold: f32,
    ambient_sum_squares: f64,
    ambient_seen: usize,
    ambient_samples: usize,
    waited: usize,
    timeout_samples: usize,
    silence_counter: usize,
    silence_samples: usize,
    min_speech_samples: usize,
    max_phrase_samples: usize,
    speech_buffer: Vec<f32>,
}

impl UtteranceDetector {
    /// Create a detector for a stream at `sample_rate`
    #[must_use]
    pub fn new(settings: VadSettings, sample_rate: u32) -> Self {
        let samples = |d: Duration| seconds_to_samples(d.as_secs_f64(), sample_rate);
        let ambient_samples = samples(settings.ambient_window);

        Self {
            state: if ambient_samples == 0 {
                DetectorState::Waiting
            } else {
                DetectorState::Calibrating
            },
            threshold: settings.energy_threshold,
            ambient_sum_squares: 0.0,
            ambient_seen: 0,
            ambient_samples,
            waited: 0,
            timeout_samples: samples(settings.timeout),
            silence_counter: 0,
            silence_samples: samples(settings.trailing_silence),
            min_speech_samples: seconds_to_samples(MIN_SPEECH_SECS, sample_rate),
            max_phrase_samples: samples(settings.phrase_limit).max(1),
            speech_buffer: Vec::new(),
        }
    }

    /// Feed a chunk of samples
    pub fn process(&mut self, samples: &[f32]) -> VadEvent {
        match self.state {
            DetectorState::Calibrating => {
                self.ambient_sum_squares += samples.iter().map(|s| f64::from(s * s)).sum::<f64>();
                self.ambient_seen += samples.len();

                if self.ambient_seen >= self.ambient_samples {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
                    let ambient = (self.ambient_sum_squares / self.ambient_seen as f64).sqrt() as f32;
                    self.threshold = self.threshold.max(ambient * AMBIENT_MULTIPLIER);
                    self.state = DetectorState::Waiting;
                    tracing::trace!(ambient, threshold = self.threshold, "ambient calibrated");
                }
            }
            DetectorState::Waiting => {
                let energy = calculate_energy(samples);
                if energy > self.threshold {
                    self.state = DetectorState::Speaking;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected");
                } else {
                    self.waited += samples.len();
                    if self.waited >= self.timeout_samples {
                        return VadEvent::TimedOut;
                    }
                }
            }
            DetectorState::Speaking => {
                let energy = calculate_energy(samples);
                self.speech_buffer.extend_from_slice(samples);

                if energy > self.threshold {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }
            }
        }

        if self.is_utterance_complete() {
            self.speech_buffer.truncate(self.max_phrase_samples);
            VadEvent::Utterance
        } else {
            VadEvent::Pending
        }
    }

    /// Check if the current utterance is complete
    #[must_use]
    pub fn is_utterance_complete(&self) -> bool {
        self.state == DetectorState::Speaking
            && (self.speech_buffer.len() >= self.max_phrase_samples
                || (self.silence_counter >= self.silence_samples
                    && self.speech_buffer.len() >= self.min_speech_samples))
    }

    /// Take the speech buffer, clearing it
    pub fn take_speech_buffer(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.speech_buffer)
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    /// Effective speech threshold after calibration
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn seconds_to_samples(secs: f64, sample_rate: u32) -> usize {
    (secs * f64::from(sample_rate)).round() as usize
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
