//! Daemon - wires hardware, audio and services into a conversation
//!
//! Resource failures (no servo bus, no microphone, no speaker) abort startup.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::chat::{ChatModel, OpenAiChat};
use crate::conversation::Conversation;
use crate::eyes::Eyes;
use crate::hardware::{I2cBus, ServoDriver};
use crate::voice::{
    CpalMicrophone, CpalSpeaker, MicrophoneArbiter, OpenAiSpeech, PhraseBook, SpeechOutput,
    SpeechSettings, Synthesizer, Transcriber, WhisperTranscriber,
};
use crate::{Config, Result};

/// The peepers daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a daemon from loaded configuration
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Open the servo bus and build the eye controller
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the bus cannot be opened and `Error::Bus`
    /// if the PWM chip does not respond
    pub fn open_eyes(config: &Config) -> Result<Eyes> {
        let hw = &config.hardware;
        let bus = I2cBus::open(hw.i2c_bus, hw.address)?;
        let driver = ServoDriver::new(Box::new(bus), hw.pwm_frequency)?;

        tracing::info!(
            bus = hw.i2c_bus,
            address = format_args!("{:#04x}", hw.address),
            "servo driver ready"
        );
        Ok(Eyes::new(Arc::new(driver), config.eyes.clone()))
    }

    /// Build the conversation from real devices and services
    ///
    /// # Errors
    ///
    /// Returns error if any device is missing or a service lacks credentials
    pub fn build(&self) -> Result<Conversation> {
        let config = &self.config;
        let eyes = Self::open_eyes(config)?;

        let microphone = CpalMicrophone::open(&config.audio)?;
        tracing::info!(device = %microphone.device_name(), "microphone ready");
        let microphone = Arc::new(MicrophoneArbiter::new(Box::new(microphone)));
        let speaker = CpalSpeaker::new()?;

        let transcriber: Arc<dyn Transcriber> = Arc::new(WhisperTranscriber::new(&config.voice)?);
        let synthesizer: Arc<dyn Synthesizer> = Arc::new(OpenAiSpeech::new(&config.voice)?);
        let chat: Arc<dyn ChatModel> = Arc::new(OpenAiChat::new(&config.voice, &config.chat)?);

        let speech = SpeechOutput::new(
            synthesizer,
            Arc::clone(&transcriber),
            Arc::clone(&microphone),
            Box::new(speaker),
            Arc::new(PhraseBook::new(&config.conversation)),
            SpeechSettings::new(&config.audio),
        );

        Ok(Conversation::new(
            config,
            eyes,
            speech,
            microphone,
            transcriber,
            chat,
        ))
    }

    /// Run until terminated by voice or Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if startup fails or a resource fails mid-conversation
    pub async fn run(self) -> Result<()> {
        let mut conversation = self.build()?;

        // Set up shutdown signal
        let shutdown = CancellationToken::new();
        let ctrl_c = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctrl_c.cancel();
            }
        });

        tracing::info!(
            wake = ?self.config.conversation.wake_phrases,
            "peepers ready - say the wake phrase"
        );

        let result = conversation.run(shutdown.clone()).await;
        shutdown.cancel();
        result
    }
}
