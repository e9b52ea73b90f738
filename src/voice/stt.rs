//! Speech-to-text (STT) processing

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::capture::RawAudio;
use crate::config::VoiceConfig;
use crate::{Error, Result};

/// Turns captured audio into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one utterance
    ///
    /// Returns `Ok(None)` when the audio holds no recognizable speech.
    ///
    /// # Errors
    ///
    /// Returns `Error::Stt`/`Error::Http` if the service fails
    async fn transcribe(&self, audio: &RawAudio) -> Result<Option<String>>;
}

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Whisper client for any OpenAI-compatible transcription endpoint
pub struct WhisperTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

impl WhisperTranscriber {
    /// Create a transcriber from voice settings
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the client cannot be built
    pub fn new(config: &VoiceConfig) -> Result<Self> {
        let api_key = config.require_api_key("Whisper")?;

        Ok(Self {
            client: http_client(config.request_timeout)?,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.stt_model.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &RawAudio) -> Result<Option<String>> {
        if audio.samples.is_empty() {
            return Ok(None);
        }

        let wav = audio.to_wav()?;
        tracing::debug!(audio_bytes = wav.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        let text = result.text.trim();

        if text.is_empty() {
            tracing::debug!("no speech recognized");
            return Ok(None);
        }

        tracing::info!(transcript = %text, "transcription complete");
        Ok(Some(text.to_string()))
    }
}

/// Build a reqwest client with a request timeout
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}
