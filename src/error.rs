//! Error types for Peepers

use thiserror::Error;

/// Result type alias for Peepers operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the eyes or the conversation
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device missing or unusable
    #[error("device error: {0}")]
    Device(String),

    /// Audio stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Actuator bus write or read failed
    #[error("bus error: {0}")]
    Bus(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Chat completion error
    #[error("chat error: {0}")]
    Chat(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error means a physical resource is gone
    ///
    /// Resource errors are fatal: the conversation cannot continue without
    /// actuators or a microphone.
    #[must_use]
    pub const fn is_resource(&self) -> bool {
        matches!(self, Self::Device(_) | Self::Audio(_) | Self::Bus(_))
    }

    /// Whether this error came from an external service (ASR, TTS, chat)
    #[must_use]
    pub const fn is_service(&self) -> bool {
        matches!(
            self,
            Self::Stt(_) | Self::Tts(_) | Self::Chat(_) | Self::Http(_)
        )
    }
}
