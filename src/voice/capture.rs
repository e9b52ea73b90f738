//! Audio capture from microphone

use std::sync::mpsc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig};
use tokio_util::sync::CancellationToken;

use super::vad::{UtteranceDetector, VadEvent, VadSettings};
use crate::config::AudioConfig;
use crate::{Error, Result};

/// Preferred sample rate for capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// How long to wait for a callback chunk before rechecking timers
const CHUNK_WAIT: Duration = Duration::from_millis(100);

/// One captured utterance
#[derive(Debug, Clone, PartialEq)]
pub struct RawAudio {
    /// Mono samples in `-1.0..=1.0`
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
}

impl RawAudio {
    /// Encode as 16-bit mono WAV for STT APIs
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        samples_to_wav(&self.samples, self.sample_rate)
    }

    /// Duration of the audio
    #[must_use]
    pub fn duration(&self) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let secs = self.samples.len() as f64 / f64::from(self.sample_rate.max(1));
        Duration::from_secs_f64(secs)
    }
}

/// Outcome of a single capture
#[derive(Debug, Clone, PartialEq)]
pub enum Capture {
    /// An utterance was heard
    Audio(RawAudio),
    /// No speech started before the timeout
    TimedOut,
}

/// A physical audio input
///
/// Callers go through [`MicrophoneArbiter`](super::MicrophoneArbiter); a
/// source is never asked for two captures at once.
#[async_trait]
pub trait AudioSource: Send {
    /// Capture one utterance
    ///
    /// Waits at most `timeout` for speech to start and returns at most
    /// `phrase_limit` of audio. Once `cancel` fires the capture ends early
    /// with `TimedOut`; the device is closed before this returns.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device`/`Error::Audio` if the device fails
    async fn listen(
        &mut self,
        timeout: Duration,
        phrase_limit: Duration,
        cancel: &CancellationToken,
    ) -> Result<Capture>;
}

/// Captures utterances from a cpal input device
pub struct CpalMicrophone {
    device_filter: Option<String>,
    device_name: String,
    config: StreamConfig,
    settings: AudioConfig,
}

impl CpalMicrophone {
    /// Open the input device whose name contains `settings.input_device`,
    /// or the default input device
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no matching device or usable config exists
    pub fn open(settings: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = find_input_device(&host, settings.input_device.as_deref())?;
        let device_name = device.name().unwrap_or_default();
        let config = input_config(&device)?;

        tracing::debug!(
            device = %device_name,
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device_filter: settings.input_device.clone(),
            device_name,
            config,
            settings: settings.clone(),
        })
    }

    /// Name of the opened device
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Sample rate of captured audio
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Record a fixed window of audio without segmentation
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be built
    pub async fn record(&self, duration: Duration) -> Result<RawAudio> {
        let filter = self.device_filter.clone();
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            let host = cpal::default_host();
            let device = find_input_device(&host, filter.as_deref())?;
            let (tx, rx) = mpsc::channel();
            let stream = build_stream(&device, &config, tx)?;

            let started = Instant::now();
            let mut samples = Vec::new();
            while started.elapsed() < duration {
                if let Ok(chunk) = rx.recv_timeout(CHUNK_WAIT) {
                    samples.extend(chunk);
                }
            }
            drop(stream);

            Ok(RawAudio {
                samples,
                sample_rate: config.sample_rate.0,
            })
        })
        .await
        .map_err(|e| Error::Audio(format!("capture task failed: {e}")))?
    }
}

#[async_trait]
impl AudioSource for CpalMicrophone {
    async fn listen(
        &mut self,
        timeout: Duration,
        phrase_limit: Duration,
        cancel: &CancellationToken,
    ) -> Result<Capture> {
        let filter = self.device_filter.clone();
        let config = self.config.clone();
        let settings = VadSettings {
            energy_threshold: self.settings.energy_threshold,
            ambient_window: self.settings.ambient_window,
            trailing_silence: self.settings.trailing_silence,
            timeout,
            phrase_limit,
        };

        // cpal streams are not Send, so the stream lives and dies on one blocking thread
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || listen_blocking(filter.as_deref(), &config, settings, &cancel))
            .await
            .map_err(|e| Error::Audio(format!("capture task failed: {e}")))?
    }
}

fn listen_blocking(
    filter: Option<&str>,
    config: &StreamConfig,
    settings: VadSettings,
    cancel: &CancellationToken,
) -> Result<Capture> {
    let host = cpal::default_host();
    let device = find_input_device(&host, filter)?;
    let sample_rate = config.sample_rate.0;

    let (tx, rx) = mpsc::channel();
    let stream = build_stream(&device, config, tx)?;
    let mut detector = UtteranceDetector::new(settings, sample_rate);

    // Wall-clock guard in case the device stops delivering samples
    let deadline = Instant::now()
        + settings.ambient_window
        + settings.timeout
        + settings.phrase_limit
        + settings.trailing_silence;

    let capture = loop {
        if cancel.is_cancelled() {
            tracing::debug!("capture cancelled");
            break Capture::TimedOut;
        }
        if Instant::now() > deadline {
            break if detector.state() == super::vad::DetectorState::Speaking {
                Capture::Audio(RawAudio {
                    samples: detector.take_speech_buffer(),
                    sample_rate,
                })
            } else {
                Capture::TimedOut
            };
        }

        let chunk = match rx.recv_timeout(CHUNK_WAIT) {
            Ok(chunk) => chunk,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(Error::Audio("input stream closed".to_string()));
            }
        };

        match detector.process(&chunk) {
            VadEvent::Pending => {}
            VadEvent::TimedOut => break Capture::TimedOut,
            VadEvent::Utterance => {
                break Capture::Audio(RawAudio {
                    samples: detector.take_speech_buffer(),
                    sample_rate,
                });
            }
        }
    };

    drop(stream);
    Ok(capture)
}

/// Find an input device by name substring, or the default one
///
/// # Errors
///
/// Returns `Error::Device` if nothing matches
pub fn find_input_device(host: &cpal::Host, filter: Option<&str>) -> Result<Device> {
    match filter {
        Some(filter) => host
            .input_devices()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|d| d.name().is_ok_and(|name| name.contains(filter)))
            .ok_or_else(|| Error::Device(format!("no input device matching \"{filter}\""))),
        None => host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string())),
    }
}

/// Pick an f32 input config, preferring mono at 16kHz
fn input_config(device: &Device) -> Result<StreamConfig> {
    let mut configs: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    if let Some(c) = configs.iter().find(|c| {
        c.channels() == 1
            && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
            && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
    }) {
        return Ok(c.clone().with_sample_rate(SampleRate(SAMPLE_RATE)).config());
    }

    // Fallback: fewest channels at the device's maximum rate
    configs.sort_by_key(cpal::SupportedStreamConfigRange::channels);
    configs
        .into_iter()
        .next()
        .map(|c| c.with_max_sample_rate().config())
        .ok_or_else(|| Error::Device("no suitable audio config found".to_string()))
}

/// Build and start a stream that forwards mono chunks to `tx`
fn build_stream(device: &Device, config: &StreamConfig, tx: mpsc::Sender<Vec<f32>>) -> Result<cpal::Stream> {
    let channels = usize::from(config.channels.max(1));

    let stream = device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                #[allow(clippy::cast_precision_loss)]
                let mono: Vec<f32> = if channels == 1 {
                    data.to_vec()
                } else {
                    data.chunks(channels)
                        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                        .collect()
                };
                let _ = tx.send(mono);
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
