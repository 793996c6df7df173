//! Audio capture session
//!
//! One session owns one microphone acquisition. A pump task drains device
//! frames into the utterance buffer while a ~60 Hz analysis tick publishes
//! normalized spectral energy for the voice-activity monitor. The session
//! self-terminates at the max-duration ceiling, and `stop` is idempotent.
//!
//! The tick lives inside the pump task, so cancelling the session tears the
//! tick down before the microphone stream is dropped — a tick can never
//! observe a released device.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use companion_config::constants::audio;
use companion_config::AudioSettings;
use companion_core::{AudioSource, CaptureStream, EnergySample};

use crate::EngineError;

/// Capture session configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Capture sample rate (Hz)
    pub sample_rate: u32,
    /// Energy analysis cadence (ticks per second)
    pub tick_hz: u32,
    /// Sliding FFT window, in samples
    pub analysis_window: usize,
    /// Hard ceiling on session lifetime
    pub max_duration: Duration,
    /// Bin magnitudes at or below this level map to 0.0
    pub energy_floor_db: f32,
    /// Bin magnitudes at or above this level map to 1.0
    pub energy_ceil_db: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: audio::SAMPLE_RATE,
            tick_hz: audio::ENERGY_TICK_HZ,
            analysis_window: audio::ANALYSIS_WINDOW,
            max_duration: Duration::from_millis(audio::MAX_CAPTURE_MS),
            energy_floor_db: audio::ENERGY_FLOOR_DB,
            energy_ceil_db: audio::ENERGY_CEIL_DB,
        }
    }
}

impl CaptureConfig {
    pub fn from_settings(settings: &AudioSettings) -> Self {
        Self {
            sample_rate: settings.sample_rate,
            tick_hz: settings.tick_hz,
            analysis_window: settings.analysis_window,
            max_duration: Duration::from_millis(settings.max_capture_ms),
            ..Default::default()
        }
    }
}

/// Finalized capture output: the encoded utterance, without the
/// speech-detected verdict (that belongs to the voice-activity monitor).
#[derive(Debug, Clone)]
pub struct CapturedAudio {
    /// 16-bit PCM mono WAV
    pub wav: Vec<u8>,
    /// Total captured duration
    pub duration: Duration,
}

/// One microphone acquisition, alive from `start` until `stop` or the
/// max-duration ceiling.
pub struct AudioCaptureSession {
    config: CaptureConfig,
    energy_rx: mpsc::Receiver<EnergySample>,
    cancel: CancellationToken,
    pump: Option<JoinHandle<Vec<f32>>>,
}

impl AudioCaptureSession {
    /// Acquire the microphone and begin capturing.
    ///
    /// Fails with [`EngineError::CaptureUnavailable`] when the device cannot
    /// be opened; the caller treats that as fatal for the turn and for
    /// continuous mode.
    pub async fn start(
        source: &dyn AudioSource,
        config: CaptureConfig,
    ) -> Result<Self, EngineError> {
        let stream = source.acquire().await?;

        let (energy_tx, energy_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump(stream, energy_tx, cancel.clone(), config.clone()));

        tracing::info!(
            max_ms = config.max_duration.as_millis() as u64,
            tick_hz = config.tick_hz,
            "capture session started"
        );

        Ok(Self {
            config,
            energy_rx,
            cancel,
            pump: Some(pump),
        })
    }

    /// Next energy sample, or `None` once the session has ended (ceiling
    /// reached, device gone, or stopped).
    pub async fn next_energy(&mut self) -> Option<EnergySample> {
        self.energy_rx.recv().await
    }

    /// Stop capturing, release the microphone, and finalize the utterance.
    ///
    /// Idempotent: the second and later calls return `None` and do nothing.
    pub async fn stop(&mut self) -> Option<CapturedAudio> {
        let pump = self.pump.take()?;
        self.cancel.cancel();

        let samples = match pump.await {
            Ok(samples) => samples,
            Err(e) => {
                tracing::error!(error = %e, "capture pump task failed");
                Vec::new()
            }
        };

        let duration =
            Duration::from_secs_f64(samples.len() as f64 / self.config.sample_rate as f64);
        let wav = match encode_wav(&samples, self.config.sample_rate) {
            Ok(wav) => wav,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode utterance");
                Vec::new()
            }
        };

        tracing::debug!(
            samples = samples.len(),
            duration_ms = duration.as_millis() as u64,
            wav_bytes = wav.len(),
            "capture session stopped"
        );

        Some(CapturedAudio { wav, duration })
    }
}

impl Drop for AudioCaptureSession {
    fn drop(&mut self) {
        // A dropped session must not leave the pump (and the device) alive.
        self.cancel.cancel();
    }
}

/// Drain device frames and publish energy samples until cancelled, the
/// ceiling elapses, or the device stops. Returns the accumulated samples.
async fn pump(
    mut stream: CaptureStream,
    energy_tx: mpsc::Sender<EnergySample>,
    cancel: CancellationToken,
    config: CaptureConfig,
) -> Vec<f32> {
    let started = Instant::now();
    let ceiling = time::sleep_until(started + config.max_duration);
    tokio::pin!(ceiling);

    let mut analyzer = EnergyAnalyzer::new(
        config.analysis_window,
        config.energy_floor_db,
        config.energy_ceil_db,
    );
    let mut buffer: Vec<f32> = Vec::with_capacity(
        config.sample_rate as usize * config.max_duration.as_secs() as usize,
    );

    let mut tick = time::interval(Duration::from_secs_f64(1.0 / config.tick_hz as f64));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("capture cancelled");
                break;
            }
            _ = &mut ceiling => {
                tracing::info!(
                    max_ms = config.max_duration.as_millis() as u64,
                    "capture reached max duration"
                );
                break;
            }
            frame = stream.next_frame() => match frame {
                Some(frame) => {
                    buffer.extend_from_slice(&frame.samples);
                    analyzer.push(&frame.samples);
                }
                None => {
                    tracing::warn!("input stream ended before capture was stopped");
                    break;
                }
            },
            _ = tick.tick() => {
                let sample = EnergySample {
                    level: analyzer.level(),
                    elapsed: started.elapsed(),
                };
                // A slow or departed receiver only misses display frames.
                let _ = energy_tx.try_send(sample);
            }
        }
    }

    buffer
    // `stream` drops here: the release guard gives the microphone back.
}

/// Sliding-window spectral energy, matching the byte-frequency analyser the
/// browser exposes: per-bin magnitude (relative to full scale) mapped
/// linearly from [floor_db, ceil_db] into [0, 1], then averaged across bins.
struct EnergyAnalyzer {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    filled: usize,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    floor_db: f32,
    ceil_db: f32,
}

impl EnergyAnalyzer {
    fn new(window_len: usize, floor_db: f32, ceil_db: f32) -> Self {
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(window_len);
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        Self {
            fft,
            window: vec![0.0; window_len],
            filled: 0,
            input,
            spectrum,
            floor_db,
            ceil_db,
        }
    }

    /// Append samples, keeping only the most recent window.
    fn push(&mut self, samples: &[f32]) {
        let len = self.window.len();
        if samples.len() >= len {
            self.window.copy_from_slice(&samples[samples.len() - len..]);
        } else {
            self.window.rotate_left(samples.len());
            self.window[len - samples.len()..].copy_from_slice(samples);
        }
        self.filled = (self.filled + samples.len()).min(len);
    }

    /// Current normalized energy in [0, 1].
    fn level(&mut self) -> f32 {
        if self.filled == 0 {
            return 0.0;
        }

        self.input.copy_from_slice(&self.window);
        if let Err(e) = self.fft.process(&mut self.input, &mut self.spectrum) {
            tracing::warn!(error = %e, "energy analysis FFT failed");
            return 0.0;
        }

        let n = self.window.len() as f32;
        let span = self.ceil_db - self.floor_db;
        let sum: f32 = self
            .spectrum
            .iter()
            .map(|bin| {
                let magnitude = bin.norm() * 2.0 / n;
                if magnitude <= 0.0 {
                    return 0.0;
                }
                let db = 20.0 * magnitude.log10();
                ((db - self.floor_db) / span).clamp(0.0, 1.0)
            })
            .sum();

        sum / self.spectrum.len() as f32
    }
}

fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for &sample in samples {
        let pcm16 = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        writer.write_sample(pcm16)?;
    }
    writer.finalize()?;

    Ok(cursor.into_inner())
}
