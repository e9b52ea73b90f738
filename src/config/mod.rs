//! Configuration management for Peepers

pub mod file;

use std::path::Path;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{Error, Result};

use file::PeepersConfigFile;

/// Peepers configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Eye geometry and idle animation
    pub eyes: EyeConfig,

    /// Conversation phrases and liveness
    pub conversation: ConversationConfig,

    /// Microphone capture timing
    pub audio: AudioConfig,

    /// Speech services (STT/TTS)
    pub voice: VoiceConfig,

    /// Chat completion
    pub chat: ChatConfig,

    /// Servo driver bus
    pub hardware: HardwareConfig,
}

/// A gaze servo with its travel range
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GazeAxis {
    /// PWM channel
    pub channel: u8,
    /// Smallest angle picked while wandering
    pub min: f64,
    /// Largest angle picked while wandering
    pub max: f64,
    /// Resting angle
    pub center: f64,
}

/// An eyelid servo with its open and closed positions
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LidAxis {
    /// PWM channel
    pub channel: u8,
    /// Angle with the lid open
    pub open: f64,
    /// Angle with the lid closed
    pub closed: f64,
}

/// Eye geometry and idle animation timing
#[derive(Debug, Clone)]
pub struct EyeConfig {
    pub horizontal: GazeAxis,
    pub vertical: GazeAxis,
    pub upper_lid: LidAxis,
    pub lower_lid: LidAxis,

    /// Probability of a blink on each idle cycle
    pub blink_chance: f64,

    /// Degrees advanced per motion step
    pub step_degrees: f64,

    /// Duration of one idle wander move
    pub wander_duration: Duration,

    /// Duration of one lid move (open or close)
    pub lid_duration: Duration,

    /// Duration of the centring move
    pub center_duration: Duration,

    /// Pause between the close and open legs of a blink
    pub blink_hold: Duration,

    /// Pause between idle cycles
    pub cycle_pause: Duration,
}

impl Default for EyeConfig {
    fn default() -> Self {
        Self {
            horizontal: GazeAxis {
                channel: 0,
                min: 30.0,
                max: 140.0,
                center: 90.0,
            },
            vertical: GazeAxis {
                channel: 1,
                min: 80.0,
                max: 90.0,
                center: 85.0,
            },
            upper_lid: LidAxis {
                channel: 2,
                open: 170.0,
                closed: 100.0,
            },
            lower_lid: LidAxis {
                channel: 15,
                open: 0.0,
                closed: 80.0,
            },
            blink_chance: 0.1,
            step_degrees: 1.0,
            wander_duration: Duration::from_millis(500),
            lid_duration: Duration::from_millis(100),
            center_duration: Duration::from_millis(400),
            blink_hold: Duration::from_millis(50),
            cycle_pause: Duration::from_secs(1),
        }
    }
}

/// Conversation phrases, canned utterances and liveness
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Phrases that wake the assistant (case-insensitive substring match)
    pub wake_phrases: Vec<String>,

    /// Phrases that end the current conversation
    pub end_phrases: Vec<String>,

    /// Phrases that shut the process down
    pub terminate_phrases: Vec<String>,

    /// Silence allowed before an active conversation times out
    pub liveness_timeout: Duration,

    /// Maximum history length, system turn included
    pub history_cap: usize,

    pub system_prompt: String,
    pub greeting: String,
    pub acknowledgement: String,
    pub farewell: String,
    pub timeout_farewell: String,
    pub terminate_farewell: String,
    pub not_understood: String,
    pub chat_apology: String,

    /// Blinks performed when woken
    pub wake_blinks: u32,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            wake_phrases: vec!["hey hey".to_string()],
            end_phrases: vec!["goodbye".to_string(), "end chat".to_string()],
            terminate_phrases: vec!["terminate".to_string(), "kill switch".to_string()],
            liveness_timeout: Duration::from_secs(15),
            history_cap: 10,
            system_prompt: "You are a helpful assistant. Keep responses concise and natural for voice interaction.".to_string(),
            greeting: "What's up!".to_string(),
            acknowledgement: "Yes?".to_string(),
            farewell: "Goodbye! I'll be listening for the wake word again.".to_string(),
            timeout_farewell: "I'll go back to standby now.".to_string(),
            terminate_farewell: "Shutting down. Goodbye!".to_string(),
            not_understood: "Sorry, I didn't catch that.".to_string(),
            chat_apology: "Sorry, I couldn't process that.".to_string(),
            wake_blinks: 2,
        }
    }
}

/// Microphone capture timing
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Substring of the input device name; default device when `None`
    pub input_device: Option<String>,

    /// Per-call timeout while waiting for the wake phrase
    pub wake_timeout: Duration,

    /// Phrase limit while waiting for the wake phrase
    pub wake_phrase_limit: Duration,

    /// Per-call timeout for dictation
    pub listen_timeout: Duration,

    /// Phrase limit for dictation
    pub max_phrase: Duration,

    /// Per-call timeout of the barge-in listener
    pub barge_in_timeout: Duration,

    /// Phrase limit of the barge-in listener
    pub barge_in_phrase_limit: Duration,

    /// Ambient noise calibration window at the start of each capture
    pub ambient_window: Duration,

    /// Silence that ends an utterance once speech has started
    pub trailing_silence: Duration,

    /// Minimum RMS energy considered speech
    pub energy_threshold: f32,

    /// Playback cancellation poll interval
    pub playback_poll: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            wake_timeout: Duration::from_secs(1),
            wake_phrase_limit: Duration::from_secs(2),
            listen_timeout: Duration::from_secs(10),
            max_phrase: Duration::from_secs(15),
            barge_in_timeout: Duration::from_secs(1),
            barge_in_phrase_limit: Duration::from_millis(1500),
            ambient_window: Duration::from_millis(200),
            trailing_silence: Duration::from_millis(800),
            energy_threshold: 0.02,
            playback_poll: Duration::from_millis(50),
        }
    }
}

/// Speech services configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Base URL of the OpenAI-compatible API
    pub api_base: String,

    /// API key shared by STT, TTS and chat
    pub api_key: Option<SecretString>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// Per-request timeout for every service call
    pub request_timeout: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
            request_timeout: Duration::from_secs(20),
        }
    }
}

impl VoiceConfig {
    /// The API key, required by every remote service
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming `service` if the key is unset or empty
    pub fn require_api_key(&self, service: &str) -> Result<SecretString> {
        self.api_key
            .clone()
            .filter(|key| !key.expose_secret().is_empty())
            .ok_or_else(|| Error::Config(format!("OpenAI API key required for {service}")))
    }
}

/// Chat completion configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Model identifier
    pub model: String,

    /// Max tokens for replies
    pub max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 150,
        }
    }
}

/// Servo driver bus configuration
#[derive(Debug, Clone)]
pub struct HardwareConfig {
    /// I2C bus number (`/dev/i2c-N`)
    pub i2c_bus: u8,

    /// 7-bit address of the PWM driver
    pub address: u16,

    /// PWM frame frequency in Hz
    pub pwm_frequency: f64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            address: 0x40,
            pwm_frequency: 50.0,
        }
    }
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// With an explicit `path` the file must exist and parse; otherwise the
    /// standard path is used when present.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit file cannot be loaded or the result is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => file::load_config_file_from(path)?,
            None => file::load_config_file(),
        };

        let mut config = Self::default();
        config.apply_file(file)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay values present in the config file
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a duration is negative, not a number or
    /// too large to represent
    pub fn apply_file(&mut self, file: PeepersConfigFile) -> Result<()> {
        let eyes = &mut self.eyes;
        if let Some(axis) = file.eyes.horizontal {
            eyes.horizontal = axis;
        }
        if let Some(axis) = file.eyes.vertical {
            eyes.vertical = axis;
        }
        if let Some(lid) = file.eyes.upper_lid {
            eyes.upper_lid = lid;
        }
        if let Some(lid) = file.eyes.lower_lid {
            eyes.lower_lid = lid;
        }
        overlay(&mut eyes.blink_chance, file.eyes.blink_chance);
        overlay(&mut eyes.step_degrees, file.eyes.step_degrees);
        overlay_secs(&mut eyes.wander_duration, file.eyes.wander_secs, "eyes.wander_secs")?;
        overlay_secs(&mut eyes.lid_duration, file.eyes.lid_secs, "eyes.lid_secs")?;
        overlay_secs(&mut eyes.center_duration, file.eyes.center_secs, "eyes.center_secs")?;
        overlay_secs(&mut eyes.blink_hold, file.eyes.blink_hold_secs, "eyes.blink_hold_secs")?;
        overlay_secs(&mut eyes.cycle_pause, file.eyes.cycle_pause_secs, "eyes.cycle_pause_secs")?;

        let conv = &mut self.conversation;
        let f = file.conversation;
        overlay(&mut conv.wake_phrases, f.wake_phrases);
        overlay(&mut conv.end_phrases, f.end_phrases);
        overlay(&mut conv.terminate_phrases, f.terminate_phrases);
        overlay_secs(
            &mut conv.liveness_timeout,
            f.liveness_timeout_secs,
            "conversation.liveness_timeout_secs",
        )?;
        overlay(&mut conv.history_cap, f.history_cap);
        overlay(&mut conv.system_prompt, f.system_prompt);
        overlay(&mut conv.greeting, f.greeting);
        overlay(&mut conv.acknowledgement, f.acknowledgement);
        overlay(&mut conv.farewell, f.farewell);
        overlay(&mut conv.timeout_farewell, f.timeout_farewell);
        overlay(&mut conv.terminate_farewell, f.terminate_farewell);
        overlay(&mut conv.not_understood, f.not_understood);
        overlay(&mut conv.chat_apology, f.chat_apology);
        overlay(&mut conv.wake_blinks, f.wake_blinks);

        let audio = &mut self.audio;
        let f = file.audio;
        if f.input_device.is_some() {
            audio.input_device = f.input_device;
        }
        overlay_secs(&mut audio.wake_timeout, f.wake_timeout_secs, "audio.wake_timeout_secs")?;
        overlay_secs(&mut audio.wake_phrase_limit, f.wake_phrase_secs, "audio.wake_phrase_secs")?;
        overlay_secs(
            &mut audio.listen_timeout,
            f.listen_timeout_secs,
            "audio.listen_timeout_secs",
        )?;
        overlay_secs(&mut audio.max_phrase, f.max_phrase_secs, "audio.max_phrase_secs")?;
        overlay_secs(
            &mut audio.barge_in_timeout,
            f.barge_in_timeout_secs,
            "audio.barge_in_timeout_secs",
        )?;
        overlay_secs(
            &mut audio.barge_in_phrase_limit,
            f.barge_in_phrase_secs,
            "audio.barge_in_phrase_secs",
        )?;
        overlay_secs(&mut audio.ambient_window, f.ambient_secs, "audio.ambient_secs")?;
        overlay_secs(
            &mut audio.trailing_silence,
            f.trailing_silence_secs,
            "audio.trailing_silence_secs",
        )?;
        overlay(&mut audio.energy_threshold, f.energy_threshold);
        if let Some(ms) = f.playback_poll_ms {
            audio.playback_poll = Duration::from_millis(ms);
        }

        let voice = &mut self.voice;
        let f = file.voice;
        overlay(&mut voice.api_base, f.api_base);
        if let Some(key) = f.api_key {
            voice.api_key = Some(SecretString::from(key));
        }
        overlay(&mut voice.stt_model, f.stt_model);
        overlay(&mut voice.tts_model, f.tts_model);
        overlay(&mut voice.tts_voice, f.tts_voice);
        overlay(&mut voice.tts_speed, f.tts_speed);
        overlay_secs(
            &mut voice.request_timeout,
            f.request_timeout_secs,
            "voice.request_timeout_secs",
        )?;

        overlay(&mut self.chat.model, file.chat.model);
        overlay(&mut self.chat.max_tokens, file.chat.max_tokens);

        overlay(&mut self.hardware.i2c_bus, file.hardware.i2c_bus);
        overlay(&mut self.hardware.address, file.hardware.address);
        overlay(&mut self.hardware.pwm_frequency, file.hardware.pwm_frequency);
        Ok(())
    }

    /// Overlay environment variables, looked up through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.voice.api_key = Some(SecretString::from(key));
        }
        overlay(&mut self.chat.model, lookup("PEEPERS_CHAT_MODEL"));
        overlay(&mut self.voice.stt_model, lookup("PEEPERS_STT_MODEL"));
        overlay(&mut self.voice.tts_model, lookup("PEEPERS_TTS_MODEL"));
        overlay(&mut self.voice.tts_voice, lookup("PEEPERS_TTS_VOICE"));
        if let Some(phrase) = lookup("PEEPERS_WAKE_PHRASE") {
            self.conversation.wake_phrases = vec![phrase];
        }
        if let Some(device) = lookup("PEEPERS_INPUT_DEVICE") {
            self.audio.input_device = Some(device);
        }
        if let Some(bus) = lookup("PEEPERS_I2C_BUS").and_then(|s| s.parse().ok()) {
            self.hardware.i2c_bus = bus;
        }
    }

    /// Check ranges and invariants
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        let eyes = &self.eyes;
        for (name, axis) in [("horizontal", eyes.horizontal), ("vertical", eyes.vertical)] {
            if !in_servo_range(axis.min) || !in_servo_range(axis.max) || !in_servo_range(axis.center) {
                return Err(Error::Config(format!("eyes.{name}: angles must be within 0..=180")));
            }
            if axis.min > axis.max {
                return Err(Error::Config(format!("eyes.{name}: min exceeds max")));
            }
        }
        for (name, lid) in [("upper_lid", eyes.upper_lid), ("lower_lid", eyes.lower_lid)] {
            if !in_servo_range(lid.open) || !in_servo_range(lid.closed) {
                return Err(Error::Config(format!("eyes.{name}: angles must be within 0..=180")));
            }
        }
        let channels = [
            eyes.horizontal.channel,
            eyes.vertical.channel,
            eyes.upper_lid.channel,
            eyes.lower_lid.channel,
        ];
        if channels.iter().any(|&c| c >= crate::hardware::CHANNEL_COUNT) {
            return Err(Error::Config("eyes: channel out of range".to_string()));
        }
        if !(0.0..=1.0).contains(&eyes.blink_chance) {
            return Err(Error::Config("eyes.blink_chance must be within 0..=1".to_string()));
        }
        if eyes.step_degrees <= 0.0 || !eyes.step_degrees.is_finite() {
            return Err(Error::Config("eyes.step_degrees must be positive".to_string()));
        }

        let conv = &self.conversation;
        if conv.wake_phrases.iter().all(|p| p.trim().is_empty()) {
            return Err(Error::Config("conversation.wake_phrases is empty".to_string()));
        }
        if conv.history_cap < 2 {
            return Err(Error::Config("conversation.history_cap must be at least 2".to_string()));
        }
        if conv.liveness_timeout.is_zero() {
            return Err(Error::Config("conversation.liveness_timeout must be positive".to_string()));
        }

        let audio = &self.audio;
        if audio.wake_timeout.is_zero() || audio.listen_timeout.is_zero() || audio.barge_in_timeout.is_zero() {
            return Err(Error::Config("audio timeouts must be positive".to_string()));
        }
        if audio.playback_poll.is_zero() {
            return Err(Error::Config("audio.playback_poll must be positive".to_string()));
        }

        if self.hardware.pwm_frequency <= 0.0 {
            return Err(Error::Config("hardware.pwm_frequency must be positive".to_string()));
        }

        Ok(())
    }
}

fn overlay<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn overlay_secs(target: &mut Duration, secs: Option<f64>, field: &str) -> Result<()> {
    if let Some(secs) = secs {
        *target = Duration::try_from_secs_f64(secs)
            .map_err(|e| Error::Config(format!("{field} = {secs}: {e}")))?;
    }
    Ok(())
}

fn in_servo_range(angle: f64) -> bool {
    (0.0..=180.0).contains(&angle)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.conversation.wake_phrases, vec!["hey hey"]);
        assert_eq!(config.conversation.history_cap, 10);
        assert_eq!(config.eyes.lower_lid.channel, 15);
    }

    #[test]
    fn test_file_overlay() {
        let file: PeepersConfigFile = toml::from_str(
            r#"
            [eyes]
            wander_secs = 0.25
            [conversation]
            liveness_timeout_secs = 12
            [audio]
            input_device = "USB"
            playback_poll_ms = 20
            [hardware]
            address = 65
            "#,
        )
        .unwrap();

        let mut config = Config::default();
        config.apply_file(file).unwrap();

        assert_eq!(config.eyes.wander_duration, Duration::from_millis(250));
        assert_eq!(config.conversation.liveness_timeout, Duration::from_secs(12));
        assert_eq!(config.audio.input_device.as_deref(), Some("USB"));
        assert_eq!(config.audio.playback_poll, Duration::from_millis(20));
        assert_eq!(config.hardware.address, 65);
        // Untouched values keep their defaults
        assert_eq!(config.chat.max_tokens, 150);
    }

    #[test]
    fn test_unrepresentable_duration_is_rejected() {
        for value in ["1e30", "-2.0", "nan"] {
            let toml = format!("[conversation]\nliveness_timeout_secs = {value}\n");
            let file: PeepersConfigFile = toml::from_str(&toml).unwrap();

            let mut config = Config::default();
            let result = config.apply_file(file);
            assert!(
                matches!(
                    &result,
                    Err(Error::Config(msg)) if msg.contains("conversation.liveness_timeout_secs")
                ),
                "{value}: {result:?}"
            );
            assert_eq!(config.conversation.liveness_timeout, Duration::from_secs(15));
        }
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("PEEPERS_WAKE_PHRASE", "hello eyes"),
            ("PEEPERS_I2C_BUS", "3"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(ToString::to_string));

        let key = config.voice.require_api_key("test").unwrap();
        assert_eq!(key.expose_secret(), "sk-test");
        assert_eq!(config.conversation.wake_phrases, vec!["hello eyes"]);
        assert_eq!(config.hardware.i2c_bus, 3);
    }

    #[test]
    fn test_api_key_stays_out_of_debug_output() {
        let mut config = Config::default();
        config.voice.api_key = Some(SecretString::from("sk-very-secret".to_string()));
        assert!(!format!("{config:?}").contains("sk-very-secret"));

        config.voice.api_key = Some(SecretString::from(String::new()));
        assert!(matches!(
            config.voice.require_api_key("chat"),
            Err(Error::Config(msg)) if msg.contains("chat")
        ));
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        let mut config = Config::default();
        config.eyes.horizontal.min = 150.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.eyes.blink_chance = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.conversation.history_cap = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.eyes.upper_lid.channel = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[chat]\nmodel = \"gpt-test\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.chat.model, "gpt-test");
    }

    #[test]
    fn test_load_invalid_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[eyes]\nblink_chance = \"often\"\n").unwrap();

        assert!(matches!(Config::load(Some(&path)), Err(Error::Toml(_))));
    }
}
