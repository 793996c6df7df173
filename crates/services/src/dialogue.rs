//! Dialogue client
//!
//! Sends each user turn to `POST /chat` with the active mode and working
//! language; the reply may carry a language the backend detected, which the
//! orchestrator adopts for the rest of the session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use companion_config::ServiceSettings;
use companion_core::{DialogueReply, DialogueRequest, DialogueService, Language, ServiceError};

use crate::{check_status, transport_error, BackendClient};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    mode: &'a str,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    response: String,
    #[serde(default)]
    language: Option<String>,
}

/// HTTP dialogue client.
pub struct HttpDialogueClient {
    backend: BackendClient,
}

impl HttpDialogueClient {
    pub fn new(settings: &ServiceSettings) -> Result<Self, ServiceError> {
        Ok(Self {
            backend: BackendClient::new(settings)?,
        })
    }
}

#[async_trait]
impl DialogueService for HttpDialogueClient {
    async fn respond(&self, request: DialogueRequest) -> Result<DialogueReply, ServiceError> {
        let response = self
            .backend
            .http
            .post(self.backend.url("/chat"))
            .json(&ChatRequest {
                message: &request.text,
                mode: request.mode.as_str(),
                language: request.language.code(),
            })
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;

        let language = body.language.as_deref().and_then(Language::from_code);
        if body.language.is_some() && language.is_none() {
            tracing::warn!(
                language = ?body.language,
                "dialogue service reported an unknown language, ignoring"
            );
        }

        tracing::debug!(
            chars = body.response.len(),
            language = ?language,
            "dialogue response"
        );

        Ok(DialogueReply {
            text: body.response,
            language,
        })
    }
}
