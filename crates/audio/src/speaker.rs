//! Speaker playback over rodio
//!
//! Decodes fetched audio (MP3 from the synthesis service) and plays it on
//! the default output device. The poll loop watches the cancellation token
//! so a superseded response falls silent immediately.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, Sink};
use tokio_util::sync::CancellationToken;

use companion_core::{AudioOutput, PlaybackError};

/// `AudioOutput` backed by the default output device.
pub struct RodioSpeaker {
    poll: Duration,
}

impl RodioSpeaker {
    pub fn new() -> Self {
        Self {
            poll: Duration::from_millis(25),
        }
    }
}

impl Default for RodioSpeaker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioOutput for RodioSpeaker {
    async fn play(&self, audio: Vec<u8>, cancel: CancellationToken) -> Result<(), PlaybackError> {
        let poll = self.poll;

        // rodio playback is blocking; keep it off the async runtime.
        let result = tokio::task::spawn_blocking(move || {
            let (_stream, handle) =
                OutputStream::try_default().map_err(|e| PlaybackError::Device(e.to_string()))?;
            let sink = Sink::try_new(&handle).map_err(|e| PlaybackError::Device(e.to_string()))?;

            let source = Decoder::new(Cursor::new(audio))
                .map_err(|e| PlaybackError::Decode(e.to_string()))?;
            sink.append(source);

            while !sink.empty() {
                if cancel.is_cancelled() {
                    sink.stop();
                    tracing::debug!("playback stopped by cancellation");
                    break;
                }
                std::thread::sleep(poll);
            }

            Ok(())
            // sink and stream drop here: decoded buffers and the device
            // handle are released before the call resolves.
        })
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(e) => Err(PlaybackError::Device(format!("playback task failed: {e}"))),
        }
    }
}
