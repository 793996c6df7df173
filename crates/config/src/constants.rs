//! Centralized constants for the voice companion
//!
//! Single source of truth for thresholds, timings, endpoints and fixed
//! phrases used across the crates. Settings default to these values; code
//! that needs a knob should read it from `Settings`, not from here.

/// Audio capture and energy analysis
pub mod audio {
    /// Engine-wide capture sample rate (Hz)
    pub const SAMPLE_RATE: u32 = 16_000;

    /// Energy analysis cadence (the original polled at display refresh)
    pub const ENERGY_TICK_HZ: u32 = 60;

    /// Sliding FFT window, in samples (64 ms at 16 kHz)
    pub const ANALYSIS_WINDOW: usize = 1024;

    /// Normalized energy above which a sample counts as speech
    pub const SILENCE_THRESHOLD: f32 = 0.015;

    /// Trailing silence that ends an utterance (ms)
    pub const SILENCE_HOLD_MS: u64 = 1_500;

    /// Hard ceiling on a single capture session (ms)
    pub const MAX_CAPTURE_MS: u64 = 20_000;

    /// Bin magnitudes at or below this level map to 0.0
    pub const ENERGY_FLOOR_DB: f32 = -100.0;

    /// Bin magnitudes at or above this level map to 1.0
    pub const ENERGY_CEIL_DB: f32 = -30.0;
}

/// Turn-loop timings
pub mod timing {
    /// Delay before re-listening when capture saw no speech (ms)
    pub const NO_SPEECH_RETRY_MS: u64 = 300;

    /// Delay before re-listening after a spoken reply or apology (ms)
    pub const TURN_RETRY_MS: u64 = 500;

    /// HTTP client timeout for all service calls (ms)
    pub const HTTP_TIMEOUT_MS: u64 = 30_000;
}

/// Service endpoints (defaults for local development)
pub mod endpoints {
    /// Companion backend (transcription, dialogue, synthesis, verification)
    pub const BACKEND_DEFAULT: &str = "http://127.0.0.1:8000";
}

/// Fixed user-facing phrases
pub mod phrases {
    /// Spoken when transcription fails or hears nothing usable
    pub const APOLOGY_UNHEARD: &str = "I couldn't hear that, please try again";

    /// Spoken when the dialogue service fails
    pub const APOLOGY_ERROR: &str = "Sorry, something went wrong";

    /// Spoken when the microphone cannot be opened
    pub const APOLOGY_NO_MICROPHONE: &str = "I can't use the microphone right now.";

    /// Default companion name, used in the start greeting
    pub const DEFAULT_NAME: &str = "Bobo";
}
