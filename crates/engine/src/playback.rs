//! Speech synthesis playback
//!
//! Single-flight controller over the one exclusive audio-output channel.
//! A new `speak` call retires the previous one immediately: its synthesis
//! fetch is aborted, its audio stops, and its pending future resolves so
//! the caller is never left waiting. A generation counter is checked at
//! every resumption point; only the newest call may produce audible output.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use companion_core::{AudioOutput, Language, SpeechSynthesizer};

use crate::EngineError;

/// How a `speak` call finished. Every variant counts as "finished" to the
/// turn pipeline; the distinction exists for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Audio played to the end
    Completed,
    /// A newer `speak` call retired this one
    Superseded,
    /// Synthesis or playback failed; swallowed, not retried
    Failed,
    /// Text-to-speech is globally disabled
    Disabled,
}

/// Single-flight speech player.
pub struct SpeechSynthesisPlayer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Arc<dyn AudioOutput>,
    enabled: AtomicBool,
    /// Generation counter; the newest `speak` call owns the output channel.
    seq: AtomicU64,
    /// Cancellation token of the in-flight call, if any. Guarded together
    /// with `seq` bumps so retire/install never cross.
    current: Mutex<Option<CancellationToken>>,
}

impl SpeechSynthesisPlayer {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        output: Arc<dyn AudioOutput>,
        enabled: bool,
    ) -> Self {
        Self {
            synthesizer,
            output,
            enabled: AtomicBool::new(enabled),
            seq: AtomicU64::new(0),
            current: Mutex::new(None),
        }
    }

    /// Globally enable or disable text-to-speech.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Cancel the in-flight call, if any. Its `speak` future resolves as
    /// [`PlaybackOutcome::Superseded`].
    pub fn cancel(&self) {
        if let Some(token) = self.current.lock().take() {
            token.cancel();
            tracing::debug!("playback cancelled");
        }
    }

    /// Fetch synthesized speech for `text` and play it.
    ///
    /// Always resolves: on completion, supersession, disablement, or
    /// failure. Never hangs the caller.
    pub async fn speak(&self, text: &str, language: Language) -> PlaybackOutcome {
        if text.trim().is_empty() {
            return PlaybackOutcome::Completed;
        }
        if !self.is_enabled() {
            tracing::debug!("text-to-speech disabled, skipping synthesis");
            return PlaybackOutcome::Disabled;
        }

        // Install this call as the current one, retiring the previous.
        let (seq, token) = {
            let mut current = self.current.lock();
            let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
            let token = CancellationToken::new();
            if let Some(previous) = current.replace(token.clone()) {
                previous.cancel();
            }
            (seq, token)
        };

        tracing::debug!(seq, chars = text.len(), %language, "synthesis fetch started");

        let audio = tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(seq, "superseded during synthesis fetch");
                return PlaybackOutcome::Superseded;
            }
            result = self.synthesizer.synthesize(text, language) => match result {
                Ok(audio) => audio,
                Err(e) => {
                    let err = EngineError::Synthesis(e);
                    tracing::warn!(seq, error = %err, "synthesis failed");
                    self.retire(seq);
                    return PlaybackOutcome::Failed;
                }
            }
        };

        // The fetch may have completed after a newer call was issued.
        if token.is_cancelled() || self.seq.load(Ordering::SeqCst) != seq {
            tracing::debug!(seq, "stale synthesis result discarded");
            return PlaybackOutcome::Superseded;
        }

        tracing::debug!(seq, bytes = audio.len(), "playback started");

        let outcome = tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(seq, "playback stopped by newer request");
                PlaybackOutcome::Superseded
            }
            result = self.output.play(audio, token.clone()) => match result {
                Ok(()) => PlaybackOutcome::Completed,
                Err(e) => {
                    let err = EngineError::Playback(e);
                    tracing::warn!(seq, error = %err, "playback failed");
                    PlaybackOutcome::Failed
                }
            }
        };

        self.retire(seq);
        tracing::debug!(seq, ?outcome, "playback finished");
        outcome
    }

    /// Clear the current slot if it still belongs to `seq`.
    fn retire(&self, seq: u64) {
        let mut current = self.current.lock();
        if self.seq.load(Ordering::SeqCst) == seq {
            current.take();
        }
    }
}
