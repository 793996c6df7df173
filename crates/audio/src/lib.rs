//! Real audio device adapters
//!
//! `CpalMicrophone` implements the engine's `AudioSource` over the system
//! input device; `RodioSpeaker` implements `AudioOutput` over the default
//! output device. Both convert between hardware formats and the engine's
//! fixed 16 kHz mono f32 world.

pub mod mic;
pub mod speaker;

pub use mic::{CpalMicrophone, MicrophoneConfig};
pub use speaker::RodioSpeaker;
