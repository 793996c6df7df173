//! Transcription client
//!
//! Uploads the finalized utterance WAV to `POST /voice/transcribe` and maps
//! the `{text, success}` reply. An unsuccessful reply is data, not an error:
//! the orchestrator decides how to recover.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use companion_config::ServiceSettings;
use companion_core::{Language, ServiceError, Transcription, TranscriptionService};

use crate::{check_status, transport_error, BackendClient};

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP transcription client.
pub struct HttpTranscriptionClient {
    backend: BackendClient,
}

impl HttpTranscriptionClient {
    pub fn new(settings: &ServiceSettings) -> Result<Self, ServiceError> {
        Ok(Self {
            backend: BackendClient::new(settings)?,
        })
    }
}

#[async_trait]
impl TranscriptionService for HttpTranscriptionClient {
    async fn transcribe(
        &self,
        wav: &[u8],
        language: Language,
    ) -> Result<Transcription, ServiceError> {
        let part = Part::bytes(wav.to_vec())
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| ServiceError::Http(e.to_string()))?;
        let form = Form::new().part("audio", part);

        let response = self
            .backend
            .http
            .post(self.backend.url("/voice/transcribe"))
            .query(&[("language", language.code())])
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let body: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;

        if let Some(error) = &body.error {
            tracing::debug!(error = %error, "transcription service reported an error");
        }
        tracing::debug!(
            success = body.success,
            chars = body.text.len(),
            language = %language,
            "transcription response"
        );

        Ok(Transcription {
            text: body.text,
            success: body.success,
        })
    }
}
