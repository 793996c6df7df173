//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{audio, endpoints, phrases, timing};
use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Companion identity
    #[serde(default)]
    pub companion: CompanionSettings,

    /// Audio capture and analysis
    #[serde(default)]
    pub audio: AudioSettings,

    /// External service endpoints
    #[serde(default)]
    pub services: ServiceSettings,

    /// Turn-loop behavior
    #[serde(default)]
    pub engine: EngineSettings,
}

/// Companion identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionSettings {
    /// Name used in the start greeting
    #[serde(default = "default_name")]
    pub name: String,

    /// Speak a greeting when a conversation starts
    #[serde(default = "default_true")]
    pub greet_on_start: bool,
}

impl Default for CompanionSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            greet_on_start: true,
        }
    }
}

impl CompanionSettings {
    /// The greeting spoken when a conversation starts.
    pub fn start_greeting(&self) -> String {
        format!("Hi! I'm {}. How can I help you today?", self.name)
    }
}

/// Audio capture and energy-analysis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Capture sample rate (Hz)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Energy analysis cadence (ticks per second)
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,

    /// Sliding FFT window, in samples
    #[serde(default = "default_analysis_window")]
    pub analysis_window: usize,

    /// Normalized energy above which a sample counts as speech
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,

    /// Trailing silence that ends an utterance (ms)
    #[serde(default = "default_silence_hold_ms")]
    pub silence_hold_ms: u64,

    /// Hard ceiling on a single capture session (ms)
    #[serde(default = "default_max_capture_ms")]
    pub max_capture_ms: u64,

    /// Input device name; `None` selects the system default
    #[serde(default)]
    pub input_device: Option<String>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            tick_hz: default_tick_hz(),
            analysis_window: default_analysis_window(),
            silence_threshold: default_silence_threshold(),
            silence_hold_ms: default_silence_hold_ms(),
            max_capture_ms: default_max_capture_ms(),
            input_device: None,
        }
    }
}

/// External service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Base URL of the companion backend
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// HTTP timeout for all service calls (ms)
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,

    /// Gate each utterance through the speaker-verification endpoint
    #[serde(default)]
    pub verify_speaker: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_http_timeout_ms(),
            verify_speaker: false,
        }
    }
}

/// Turn-loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Speak responses aloud; when false, `speak` resolves immediately
    #[serde(default = "default_true")]
    pub tts_enabled: bool,

    /// Delay before re-listening when capture saw no speech (ms)
    #[serde(default = "default_no_speech_retry_ms")]
    pub no_speech_retry_ms: u64,

    /// Delay before re-listening after a spoken reply or apology (ms)
    #[serde(default = "default_turn_retry_ms")]
    pub turn_retry_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tts_enabled: true,
            no_speech_retry_ms: default_no_speech_retry_ms(),
            turn_retry_ms: default_turn_retry_ms(),
        }
    }
}

fn default_name() -> String {
    phrases::DEFAULT_NAME.to_string()
}

fn default_true() -> bool {
    true
}

fn default_sample_rate() -> u32 {
    audio::SAMPLE_RATE
}

fn default_tick_hz() -> u32 {
    audio::ENERGY_TICK_HZ
}

fn default_analysis_window() -> usize {
    audio::ANALYSIS_WINDOW
}

fn default_silence_threshold() -> f32 {
    audio::SILENCE_THRESHOLD
}

fn default_silence_hold_ms() -> u64 {
    audio::SILENCE_HOLD_MS
}

fn default_max_capture_ms() -> u64 {
    audio::MAX_CAPTURE_MS
}

fn default_base_url() -> String {
    endpoints::BACKEND_DEFAULT.to_string()
}

fn default_http_timeout_ms() -> u64 {
    timing::HTTP_TIMEOUT_MS
}

fn default_no_speech_retry_ms() -> u64 {
    timing::NO_SPEECH_RETRY_MS
}

fn default_turn_retry_ms() -> u64 {
    timing::TURN_RETRY_MS
}

/// Load settings from files and environment.
///
/// Priority: env vars > `config/{env}.toml` > `config/default.toml` >
/// built-in defaults. Both files are optional.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder().add_source(File::with_name("config/default").required(false));

    if let Some(env) = env {
        builder = builder.add_source(File::with_name(&format!("config/{}", env)).required(false));
    }

    let config = builder
        .add_source(
            Environment::with_prefix("COMPANION")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let settings: Settings = config.try_deserialize()?;

    if settings.audio.analysis_window == 0 {
        return Err(ConfigError::Invalid(
            "audio.analysis_window must be non-zero".to_string(),
        ));
    }
    if settings.audio.tick_hz == 0 {
        return Err(ConfigError::Invalid(
            "audio.tick_hz must be non-zero".to_string(),
        ));
    }

    Ok(settings)
}
