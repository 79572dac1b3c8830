//! Speech-to-text (STT) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::TranscriptionConfig;
use crate::{Error, Result};

/// Turns a WAV recording into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV audio
    ///
    /// # Errors
    ///
    /// Returns `TranscriptionFailed` if the service cannot produce a transcript
    async fn transcribe(&self, wav: &[u8]) -> Result<String>;
}

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes speech with the `OpenAI` Whisper API
pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    language: Option<String>,
    base_url: String,
}

impl WhisperTranscriber {
    /// Create a transcriber from settings
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .filter(|key| !key.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("OpenAI API key required for Whisper".to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key: SecretString::from(api_key.expose_secret().to_string()),
            model: config.model.clone(),
            language: config.language.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn request(&self, wav: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::TranscriptionFailed(e.to_string()))?,
            )
            .text("model", self.model.clone());

        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

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
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::TranscriptionFailed(format!(
                "Whisper API error {status}: {body}"
            )));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        let transcript = result.text.trim().to_string();
        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        self.request(wav).await.map_err(|e| match e {
            Error::TranscriptionFailed(_) => e,
            other => Error::TranscriptionFailed(other.to_string()),
        })
    }
}
