//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::stt::http_client;
use crate::config::VoiceConfig;
use crate::{Error, Result};

/// Turns text into playable audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text`, returning MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns `Error::Tts`/`Error::Http` if the service fails
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// `OpenAI` speech client for any compatible endpoint
pub struct OpenAiSpeech {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    voice: String,
    speed: f32,
    model: String,
}

impl OpenAiSpeech {
    /// Create a synthesizer from voice settings
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(config: &VoiceConfig) -> Result<Self> {
        let api_key = config.require_api_key("TTS")?;

        Ok(Self {
            client: http_client(config.request_timeout)?,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            voice: config.tts_voice.clone(),
            speed: config.tts_speed,
            model: config.tts_model.clone(),
        })
    }
}

#[async_trait]
impl Synthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        tracing::debug!(chars = text.len(), voice = %self.voice, "synthesizing speech");

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(Error::Tts("empty audio response".to_string()));
        }
        Ok(audio.to_vec())
    }
}
