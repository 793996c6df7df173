//! Core types and traits for the voice companion engine
//!
//! Everything the engine shares with its collaborators lives here: audio
//! frame and utterance types, the conversation data model, the traits at
//! each external seam (microphone, speaker, transcription, dialogue,
//! synthesis, transcript), and the error enums those seams return.

pub mod audio;
pub mod conversation;
pub mod error;
pub mod traits;

pub use audio::{AudioFrame, CaptureStream, EnergySample, UtteranceResult};
pub use conversation::{
    ConversationMode, ConversationState, Language, Speaker, TranscriptEntry, TurnResult,
};
pub use error::{CaptureError, PlaybackError, ServiceError};
pub use traits::{
    AudioOutput, AudioSource, DialogueReply, DialogueRequest, DialogueService, SpeakerVerifier,
    SpeechSynthesizer, Transcription, TranscriptionService, TranscriptSink,
};
