//! Audio playback to speakers

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

/// How often the playback thread checks for stop or completion
const PLAYBACK_POLL: Duration = Duration::from_millis(20);

/// Trailing time so the device drains its buffer
const DRAIN_DELAY: Duration = Duration::from_millis(100);

/// An audio output that plays one loaded clip at a time
///
/// Playback is non-blocking: `play` returns immediately and `is_busy`
/// reports whether the clip is still sounding.
pub trait AudioSink: Send {
    /// Load a clip from an audio file, replacing any previous one
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if the file cannot be read or decoded
    fn load(&mut self, path: &Path) -> Result<()>;

    /// Start playing the loaded clip
    ///
    /// # Errors
    ///
    /// Returns `Error::Device`/`Error::Audio` if the output cannot start
    fn play(&mut self) -> Result<()>;

    /// Whether the clip is still playing
    fn is_busy(&self) -> bool;

    /// Stop playback immediately
    fn stop(&mut self);
}

/// Decoded mono clip
#[derive(Debug, Clone, Default)]
pub struct Clip {
    /// Mono samples
    pub samples: Vec<f32>,
    /// Sample rate of the clip
    pub sample_rate: u32,
}

/// Plays clips on the default cpal output device
#[derive(Default)]
pub struct CpalSpeaker {
    clip: Option<Arc<Clip>>,
    active: Option<ActivePlayback>,
}

struct ActivePlayback {
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl CpalSpeaker {
    /// Check that an output device exists
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self::default())
    }

    /// Load already-decoded samples, replacing any previous clip
    pub fn load_clip(&mut self, clip: Clip) {
        self.join_active();
        self.clip = Some(Arc::new(clip));
    }

    /// Wait until the current clip stops sounding
    pub async fn wait(&self) {
        while self.is_busy() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn join_active(&mut self) {
        if let Some(active) = self.active.take() {
            active.stop.store(true, Ordering::SeqCst);
            if active.thread.join().is_err() {
                tracing::error!("playback thread panicked");
            }
        }
    }
}

impl AudioSink for CpalSpeaker {
    fn load(&mut self, path: &Path) -> Result<()> {
        self.join_active();
        let data = std::fs::read(path)?;
        let clip = decode_mp3(&data)?;
        tracing::debug!(
            samples = clip.samples.len(),
            sample_rate = clip.sample_rate,
            "clip loaded"
        );
        self.clip = Some(Arc::new(clip));
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        self.join_active();
        let Some(clip) = self.clip.clone() else {
            return Err(Error::Audio("no clip loaded".to_string()));
        };
        if clip.samples.is_empty() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let thread = {
            let stop = Arc::clone(&stop);
            let finished = Arc::clone(&finished);
            std::thread::spawn(move || {
                let result = play_blocking(&clip, &stop, &ready_tx);
                if let Err(e) = &result {
                    tracing::error!(error = %e, "playback failed");
                    let _ = ready_tx.send(result);
                }
                finished.store(true, Ordering::SeqCst);
            })
        };

        self.active = Some(ActivePlayback {
            stop,
            finished,
            thread,
        });

        // Surface stream setup errors to the caller
        match ready_rx.recv() {
            Ok(result) => result,
            Err(_) => Err(Error::Audio("playback thread exited".to_string())),
        }
    }

    fn is_busy(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| !a.finished.load(Ordering::SeqCst))
    }

    fn stop(&mut self) {
        self.join_active();
    }
}

impl Drop for CpalSpeaker {
    fn drop(&mut self) {
        self.join_active();
    }
}

/// Own a cpal output stream until the clip ends or `stop` is set
fn play_blocking(
    clip: &Arc<Clip>,
    stop: &AtomicBool,
    ready: &std::sync::mpsc::Sender<Result<()>>,
) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Device("no output device".to_string()))?;

    let rate = SampleRate(clip.sample_rate);
    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;
    let config: StreamConfig = supported.with_sample_rate(rate).config();
    let channels = usize::from(config.channels.max(1));

    let position = Arc::new(AtomicUsize::new(0));
    let samples = Arc::clone(clip);
    let cursor = Arc::clone(&position);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = cursor.load(Ordering::Relaxed);
                for frame in data.chunks_mut(channels) {
                    let sample = samples.samples.get(pos).copied().unwrap_or(0.0);
                    frame.fill(sample);
                    pos = (pos + 1).min(samples.samples.len());
                }
                cursor.store(pos, Ordering::Relaxed);
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    let _ = ready.send(Ok(()));

    let total = clip.samples.len();
    while !stop.load(Ordering::SeqCst) && position.load(Ordering::Relaxed) < total {
        std::thread::sleep(PLAYBACK_POLL);
    }
    if !stop.load(Ordering::SeqCst) {
        std::thread::sleep(DRAIN_DELAY);
    }

    drop(stream);
    tracing::debug!(
        played = position.load(Ordering::Relaxed),
        total,
        stopped = stop.load(Ordering::SeqCst),
        "playback ended"
    );
    Ok(())
}

/// Decode MP3 bytes to a mono clip
///
/// # Errors
///
/// Returns `Error::Audio` if the data is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Clip> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut clip = Clip::default();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if clip.sample_rate == 0 {
                    clip.sample_rate = u32::try_from(frame.sample_rate).unwrap_or_default();
                }

                // Convert i16 samples to f32 and handle stereo to mono
                if frame.channels == 2 {
                    clip.samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    clip.samples
                        .extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if clip.sample_rate == 0 && !clip.samples.is_empty() {
        return Err(Error::Audio("MP3 stream has no sample rate".to_string()));
    }
    Ok(clip)
}
