//! TOML configuration file loading
//!
//! Supports `~/.config/peepers/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.
//! Durations are given in (fractional) seconds.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{GazeAxis, LidAxis};
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PeepersConfigFile {
    /// Eye geometry and idle animation
    pub eyes: EyesFileConfig,

    /// Conversation phrases and liveness
    pub conversation: ConversationFileConfig,

    /// Microphone capture timing
    pub audio: AudioFileConfig,

    /// Speech services
    pub voice: VoiceFileConfig,

    /// Chat completion
    pub chat: ChatFileConfig,

    /// Servo driver bus
    pub hardware: HardwareFileConfig,
}

/// Eye geometry and idle animation configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EyesFileConfig {
    pub horizontal: Option<GazeAxis>,
    pub vertical: Option<GazeAxis>,
    pub upper_lid: Option<LidAxis>,
    pub lower_lid: Option<LidAxis>,

    /// Probability of a blink per idle cycle
    pub blink_chance: Option<f64>,

    /// Degrees advanced per motion step
    pub step_degrees: Option<f64>,

    pub wander_secs: Option<f64>,
    pub lid_secs: Option<f64>,
    pub center_secs: Option<f64>,
    pub blink_hold_secs: Option<f64>,
    pub cycle_pause_secs: Option<f64>,
}

/// Conversation configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConversationFileConfig {
    pub wake_phrases: Option<Vec<String>>,
    pub end_phrases: Option<Vec<String>>,
    pub terminate_phrases: Option<Vec<String>>,

    /// Seconds of silence before an active conversation times out
    pub liveness_timeout_secs: Option<f64>,

    /// Maximum number of history entries, system turn included
    pub history_cap: Option<usize>,

    pub system_prompt: Option<String>,
    pub greeting: Option<String>,
    pub acknowledgement: Option<String>,
    pub farewell: Option<String>,
    pub timeout_farewell: Option<String>,
    pub terminate_farewell: Option<String>,
    pub not_understood: Option<String>,
    pub chat_apology: Option<String>,

    /// Blinks performed when woken
    pub wake_blinks: Option<u32>,
}

/// Microphone capture configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AudioFileConfig {
    /// Substring of the input device name (e.g. "USB")
    pub input_device: Option<String>,

    pub wake_timeout_secs: Option<f64>,
    pub wake_phrase_secs: Option<f64>,
    pub listen_timeout_secs: Option<f64>,
    pub max_phrase_secs: Option<f64>,
    pub barge_in_timeout_secs: Option<f64>,
    pub barge_in_phrase_secs: Option<f64>,
    pub ambient_secs: Option<f64>,
    pub trailing_silence_secs: Option<f64>,
    pub energy_threshold: Option<f32>,
    pub playback_poll_ms: Option<u64>,
}

/// Speech service configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VoiceFileConfig {
    /// Base URL of the OpenAI-compatible API
    pub api_base: Option<String>,

    /// API key (prefer `OPENAI_API_KEY`)
    pub api_key: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// Per-request timeout
    pub request_timeout_secs: Option<f64>,
}

/// Chat completion configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChatFileConfig {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
}

/// Servo driver bus configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HardwareFileConfig {
    /// I2C bus number (`/dev/i2c-N`)
    pub i2c_bus: Option<u8>,

    /// 7-bit address of the PWM driver
    pub address: Option<u16>,

    /// PWM frame frequency in Hz
    pub pwm_frequency: Option<f64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `PeepersConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> PeepersConfigFile {
    let Some(path) = config_file_path() else {
        return PeepersConfigFile::default();
    };

    if !path.exists() {
        return PeepersConfigFile::default();
    }

    match load_config_file_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            PeepersConfigFile::default()
        }
    }
}

/// Load a TOML config file from an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_config_file_from(path: &Path) -> Result<PeepersConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/peepers/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("peepers").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let file: PeepersConfigFile = toml::from_str(
            r#"
            [eyes]
            blink_chance = 0.25
            horizontal = { channel = 0, min = 40.0, max = 130.0, center = 90.0 }

            [conversation]
            wake_phrases = ["hey eyes"]
            "#,
        )
        .unwrap();

        assert_eq!(file.eyes.blink_chance, Some(0.25));
        assert_eq!(file.eyes.horizontal.map(|a| a.min), Some(40.0));
        assert_eq!(
            file.conversation.wake_phrases,
            Some(vec!["hey eyes".to_string()])
        );
        assert!(file.audio.input_device.is_none());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = load_config_file_from(Path::new("/nonexistent/peepers.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
