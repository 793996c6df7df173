//! Traits at the engine's external seams
//!
//! The engine never talks to hardware or the network directly; every
//! collaborator sits behind one of these traits so the turn pipeline can be
//! driven by scripted fakes in tests and by real adapters in the binary.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::audio::CaptureStream;
use crate::conversation::{ConversationMode, Language, TranscriptEntry};
use crate::error::{CaptureError, PlaybackError, ServiceError};

/// Source of microphone audio.
///
/// `acquire` takes exclusive ownership of the device; the engine guarantees
/// the previous stream is fully dropped (device released) before acquiring
/// again.
#[async_trait]
pub trait AudioSource: Send + Sync {
    async fn acquire(&self) -> Result<CaptureStream, CaptureError>;
}

/// The single exclusive audio-output channel.
///
/// `play` must return promptly once `cancel` fires, stopping audible output
/// immediately and releasing any decoder/device resources before returning.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn play(&self, audio: Vec<u8>, cancel: CancellationToken) -> Result<(), PlaybackError>;
}

/// Transcription result as the service reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcription {
    pub text: String,
    pub success: bool,
}

impl Transcription {
    /// Usable for a dialogue call: the service succeeded and produced text.
    pub fn is_usable(&self) -> bool {
        self.success && !self.text.trim().is_empty()
    }
}

/// Speech-to-text over an encoded utterance.
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    async fn transcribe(&self, wav: &[u8], language: Language)
        -> Result<Transcription, ServiceError>;
}

/// What the orchestrator sends to the dialogue service each turn.
#[derive(Debug, Clone)]
pub struct DialogueRequest {
    pub text: String,
    pub mode: ConversationMode,
    pub language: Language,
}

/// Dialogue service reply. `language`, when present, becomes the session's
/// working language for subsequent calls.
#[derive(Debug, Clone)]
pub struct DialogueReply {
    pub text: String,
    pub language: Option<Language>,
}

#[async_trait]
pub trait DialogueService: Send + Sync {
    async fn respond(&self, request: DialogueRequest) -> Result<DialogueReply, ServiceError>;
}

/// Text-to-speech fetch. Returns encoded audio bytes ready for
/// [`AudioOutput::play`]. Cancellation happens in the caller by dropping the
/// in-flight future, which aborts the underlying request.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language: Language) -> Result<Vec<u8>, ServiceError>;
}

/// Optional speaker-verification gate, checked between capture and
/// transcription when configured.
#[async_trait]
pub trait SpeakerVerifier: Send + Sync {
    async fn verify(&self, wav: &[u8]) -> Result<bool, ServiceError>;
}

/// Append-only conversation transcript (external collaborator; never read
/// by the engine).
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn append(&self, entry: TranscriptEntry);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcription_usability() {
        let ok = Transcription {
            text: "hello".into(),
            success: true,
        };
        assert!(ok.is_usable());

        let empty = Transcription {
            text: "   ".into(),
            success: true,
        };
        assert!(!empty.is_usable());

        let failed = Transcription {
            text: "hello".into(),
            success: false,
        };
        assert!(!failed.is_usable());
    }
}
