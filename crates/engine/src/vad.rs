//! Voice-activity monitoring
//!
//! Pure energy-threshold end-pointing over the capture session's energy
//! stream. No spectral or ML classifier: anything above the threshold
//! counts as speech, including ambient noise.

use std::time::Duration;

use companion_config::constants::audio;
use companion_core::EnergySample;

/// Voice-activity configuration
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Normalized energy above which a sample counts as speech
    pub silence_threshold: f32,
    /// Trailing silence that ends an utterance
    pub silence_hold: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_threshold: audio::SILENCE_THRESHOLD,
            silence_hold: Duration::from_millis(audio::SILENCE_HOLD_MS),
        }
    }
}

/// What the orchestrator should do after an energy sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// Keep capturing
    Continue,
    /// Trailing silence elapsed after speech: stop the capture session
    EndOfUtterance,
}

/// Per-session end-pointing state.
///
/// `speech_detected` is sticky once true. Before any speech is heard there
/// is no silence timeout — capture runs until the session's max-duration
/// ceiling.
#[derive(Debug)]
pub struct VoiceActivityMonitor {
    config: VadConfig,
    speech_detected: bool,
    silence_start: Option<Duration>,
}

impl VoiceActivityMonitor {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            speech_detected: false,
            silence_start: None,
        }
    }

    /// Feed one energy sample and decide whether capture should stop.
    pub fn observe(&mut self, sample: &EnergySample) -> VadDecision {
        if sample.level > self.config.silence_threshold {
            self.silence_start = None;
            if !self.speech_detected {
                self.speech_detected = true;
                tracing::info!(
                    level = sample.level,
                    at_ms = sample.elapsed.as_millis() as u64,
                    "speech started"
                );
            }
            return VadDecision::Continue;
        }

        if self.speech_detected {
            let silence_start = *self.silence_start.get_or_insert(sample.elapsed);
            if sample.elapsed.saturating_sub(silence_start) > self.config.silence_hold {
                tracing::debug!(
                    hold_ms = self.config.silence_hold.as_millis() as u64,
                    "trailing silence elapsed, ending utterance"
                );
                return VadDecision::EndOfUtterance;
            }
        }

        VadDecision::Continue
    }

    /// Whether any sample has crossed the threshold.
    pub fn speech_detected(&self) -> bool {
        self.speech_detected
    }
}
