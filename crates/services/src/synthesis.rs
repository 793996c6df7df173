//! Speech synthesis client
//!
//! Fetches an MP3 stream from `POST /tts` for the given text and language.
//! The playback controller cancels a stale fetch by dropping this future,
//! which aborts the underlying request; no cancellation plumbing is needed
//! here.

use async_trait::async_trait;

use companion_config::ServiceSettings;
use companion_core::{Language, ServiceError, SpeechSynthesizer};

use crate::{check_status, transport_error, BackendClient};

/// HTTP synthesis client.
pub struct HttpSynthesisClient {
    backend: BackendClient,
}

impl HttpSynthesisClient {
    pub fn new(settings: &ServiceSettings) -> Result<Self, ServiceError> {
        Ok(Self {
            backend: BackendClient::new(settings)?,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesisClient {
    async fn synthesize(&self, text: &str, language: Language) -> Result<Vec<u8>, ServiceError> {
        let response = self
            .backend
            .http
            .post(self.backend.url("/tts"))
            .query(&[("text", text), ("lang", language.code())])
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let audio = response.bytes().await.map_err(transport_error)?;
        if audio.is_empty() {
            return Err(ServiceError::InvalidResponse(
                "synthesis returned no audio".to_string(),
            ));
        }

        tracing::debug!(bytes = audio.len(), language = %language, "synthesis fetched");
        Ok(audio.to_vec())
    }
}
