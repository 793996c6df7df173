//! Speaker verification client
//!
//! Optional gate: `POST /voice/verify` with the utterance WAV, answering
//! whether the voice matches the registered owner.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use companion_config::ServiceSettings;
use companion_core::{ServiceError, SpeakerVerifier};

use crate::{check_status, transport_error, BackendClient};

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    verified: bool,
}

/// HTTP speaker-verification client.
pub struct HttpSpeakerVerifier {
    backend: BackendClient,
}

impl HttpSpeakerVerifier {
    pub fn new(settings: &ServiceSettings) -> Result<Self, ServiceError> {
        Ok(Self {
            backend: BackendClient::new(settings)?,
        })
    }
}

#[async_trait]
impl SpeakerVerifier for HttpSpeakerVerifier {
    async fn verify(&self, wav: &[u8]) -> Result<bool, ServiceError> {
        let part = Part::bytes(wav.to_vec())
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| ServiceError::Http(e.to_string()))?;
        let form = Form::new().part("audio", part);

        let response = self
            .backend
            .http
            .post(self.backend.url("/voice/verify"))
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;

        tracing::debug!(verified = body.verified, "speaker verification response");
        Ok(body.verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_response_decodes() {
        let body: VerifyResponse = serde_json::from_str(r#"{"verified":true}"#).unwrap();
        assert!(body.verified);
    }
}
