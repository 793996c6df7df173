//! HTTP clients for the companion backend
//!
//! Implements the service traits from `companion-core` against the
//! companion backend's REST API: transcription, dialogue, speech synthesis,
//! and speaker verification, plus an in-memory transcript sink for wiring
//! and tests.

pub mod dialogue;
pub mod synthesis;
pub mod transcript;
pub mod transcription;
pub mod verification;

pub use dialogue::HttpDialogueClient;
pub use synthesis::HttpSynthesisClient;
pub use transcript::MemoryTranscript;
pub use transcription::HttpTranscriptionClient;
pub use verification::HttpSpeakerVerifier;

use std::time::Duration;

use companion_config::ServiceSettings;
use companion_core::ServiceError;

/// Shared construction for all backend clients.
#[derive(Clone)]
pub(crate) struct BackendClient {
    pub http: reqwest::Client,
    pub base_url: String,
}

impl BackendClient {
    pub(crate) fn new(settings: &ServiceSettings) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| ServiceError::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Map a transport error into the shared service error type.
pub(crate) fn transport_error(e: reqwest::Error) -> ServiceError {
    ServiceError::Http(e.to_string())
}

/// Reject non-success statuses with the body text for context.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ServiceError::Status {
        status: status.as_u16(),
        message,
    })
}
