//! Audio frame and utterance types
//!
//! The engine works with one fixed format end to end: 16 kHz mono f32 PCM,
//! normalized to [-1.0, 1.0]. Device adapters are responsible for converting
//! whatever the hardware delivers into this format before frames enter the
//! engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

/// A batch of captured audio samples.
///
/// Frames are small (typically 20 ms) and ordered by `sequence`; the capture
/// session accumulates them into the utterance buffer.
#[derive(Clone)]
pub struct AudioFrame {
    /// Raw samples (16 kHz mono f32, normalized to [-1.0, 1.0])
    pub samples: Arc<[f32]>,
    /// Frame sequence number for ordering
    pub sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sequence: u64) -> Self {
        Self {
            samples: samples.into(),
            sequence,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples_len", &self.samples.len())
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// One normalized energy reading from the capture session's analysis tick.
///
/// `elapsed` is measured from the start of the owning capture session, not
/// wall-clock time, so consumers (the voice-activity monitor) stay pure and
/// deterministic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergySample {
    /// Mean spectral magnitude, scaled to [0.0, 1.0]
    pub level: f32,
    /// Time since capture started
    pub elapsed: Duration,
}

/// The finalized product of one capture session.
///
/// Consumed exactly once by the transcription call, then discarded. The
/// audio itself is never persisted.
#[derive(Debug, Clone)]
pub struct UtteranceResult {
    /// Encoded utterance audio (16-bit PCM mono WAV)
    pub wav: Vec<u8>,
    /// Total captured duration
    pub duration: Duration,
    /// Whether the voice-activity monitor ever saw speech
    pub speech_detected: bool,
}

/// A live microphone acquisition.
///
/// Frames arrive on the channel until the device stops or the stream is
/// dropped. Dropping the stream releases the device unconditionally — the
/// guard runs whether capture ended in success, silence timeout, or
/// cancellation.
pub struct CaptureStream {
    frames: mpsc::Receiver<AudioFrame>,
    _release: ReleaseGuard,
}

impl CaptureStream {
    /// Wrap a frame channel together with the action that releases the
    /// underlying device.
    pub fn new(frames: mpsc::Receiver<AudioFrame>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            frames,
            _release: ReleaseGuard(Some(Box::new(release))),
        }
    }

    /// Receive the next frame; `None` once the device side has stopped.
    ///
    /// Cancel-safe: losing the race in a `select!` never loses a frame.
    pub async fn next_frame(&mut self) -> Option<AudioFrame> {
        self.frames.recv().await
    }
}

struct ReleaseGuard(Option<Box<dyn FnOnce() + Send>>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
            tracing::debug!("microphone released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn frame_reports_length() {
        let frame = AudioFrame::new(vec![0.0; 320], 7);
        assert_eq!(frame.len(), 320);
        assert!(!frame.is_empty());
        assert_eq!(frame.sequence, 7);
    }

    #[tokio::test]
    async fn capture_stream_releases_on_drop() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();

        let (tx, rx) = mpsc::channel(4);
        let stream = CaptureStream::new(rx, move || flag.store(true, Ordering::SeqCst));
        drop(tx);
        drop(stream);

        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn capture_stream_yields_frames_then_ends() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = CaptureStream::new(rx, || {});

        tx.send(AudioFrame::new(vec![0.1; 160], 0)).await.unwrap();
        drop(tx);

        assert!(stream.next_frame().await.is_some());
        assert!(stream.next_frame().await.is_none());
    }
}
