//! Voice interaction engine
//!
//! Real-time audio capture with energy-based end-pointing, a turn-taking
//! state machine chaining the transcription and dialogue services, and a
//! single-flight playback controller that never lets two spoken responses
//! overlap.
//!
//! The engine owns no hardware and no sockets; everything external comes in
//! through the traits in `companion-core`.

pub mod capture;
pub mod mode_switch;
pub mod orchestrator;
pub mod playback;
pub mod vad;

pub use capture::{AudioCaptureSession, CaptureConfig, CapturedAudio};
pub use mode_switch::{announcement_for, ModeSwitchCoordinator};
pub use orchestrator::{ConversationOrchestrator, EngineEvent, OrchestratorConfig};
pub use playback::{PlaybackOutcome, SpeechSynthesisPlayer};
pub use vad::{VadConfig, VadDecision, VoiceActivityMonitor};

use companion_core::{CaptureError, PlaybackError, ServiceError};
use thiserror::Error;

/// Turn-level failure taxonomy.
///
/// Every variant is handled inside the orchestrator's turn loop; none
/// escape the public start/stop API.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Microphone denied or unavailable. Fatal to the current attempt and
    /// to continuous mode; not retried automatically.
    #[error("microphone unavailable: {0}")]
    CaptureUnavailable(#[from] CaptureError),

    /// Capture finished but the voice-activity monitor never triggered.
    /// Recoverable and silent: re-listen or go idle.
    #[error("no speech detected")]
    NoSpeechDetected,

    /// Transcription call failed or produced nothing usable.
    #[error("transcription failed: {0}")]
    Transcription(ServiceError),

    /// Dialogue service call failed.
    #[error("dialogue service failed: {0}")]
    Dialogue(ServiceError),

    /// Synthesis fetch failed; the playback controller swallows this.
    #[error("speech synthesis failed: {0}")]
    Synthesis(ServiceError),

    /// Audio output failed; treated as "finished playing".
    #[error("audio playback failed: {0}")]
    Playback(PlaybackError),
}
