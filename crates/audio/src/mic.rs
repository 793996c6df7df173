//! Microphone capture over cpal
//!
//! cpal streams are not `Send`, so each acquisition runs on a dedicated
//! thread that owns the stream for its whole life. The audio callback
//! downmixes to mono, resamples to the engine rate when the device runs at
//! a different one, and ships fixed-size frames over a channel. Dropping
//! the returned `CaptureStream` flips a stop flag; the thread drops the
//! stream (releasing the device) and exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use rubato::{FftFixedIn, Resampler};
use tokio::sync::{mpsc, oneshot};

use companion_config::AudioSettings;
use companion_core::{AudioFrame, AudioSource, CaptureError, CaptureStream};

/// Microphone configuration
#[derive(Debug, Clone)]
pub struct MicrophoneConfig {
    /// Input device name; `None` selects the system default
    pub device_name: Option<String>,
    /// Engine sample rate frames are delivered at (Hz)
    pub sample_rate: u32,
    /// Frame length in milliseconds
    pub frame_ms: u64,
}

impl Default for MicrophoneConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            sample_rate: companion_config::constants::audio::SAMPLE_RATE,
            frame_ms: 20,
        }
    }
}

impl MicrophoneConfig {
    pub fn from_settings(settings: &AudioSettings) -> Self {
        Self {
            device_name: settings.input_device.clone(),
            sample_rate: settings.sample_rate,
            ..Default::default()
        }
    }
}

/// `AudioSource` backed by the system microphone.
pub struct CpalMicrophone {
    config: MicrophoneConfig,
}

impl CpalMicrophone {
    pub fn new(config: MicrophoneConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AudioSource for CpalMicrophone {
    async fn acquire(&self) -> Result<CaptureStream, CaptureError> {
        let config = self.config.clone();
        let (frame_tx, frame_rx) = mpsc::channel(32);
        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = stop.clone();
        std::thread::spawn(move || capture_thread(config, frame_tx, ready_tx, thread_stop));

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(CaptureError::Stream(
                    "capture thread exited before opening the device".to_string(),
                ))
            }
        }

        Ok(CaptureStream::new(frame_rx, move || {
            stop.store(true, Ordering::SeqCst);
        }))
    }
}

fn capture_thread(
    config: MicrophoneConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    ready: oneshot::Sender<Result<(), CaptureError>>,
    stop: Arc<AtomicBool>,
) {
    let stream = match open_stream(&config, frame_tx) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(25));
    }

    drop(stream);
    tracing::debug!("capture thread released the input device");
}

fn open_stream(
    config: &MicrophoneConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream, CaptureError> {
    let device = input_device(config.device_name.as_deref())?;
    let device_config = device
        .default_input_config()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    tracing::info!(
        device = device.name().unwrap_or_else(|_| "unknown".to_string()),
        rate = device_config.sample_rate().0,
        channels = device_config.channels(),
        format = ?device_config.sample_format(),
        "opening input device"
    );

    match device_config.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(config, &device, &device_config, frame_tx),
        cpal::SampleFormat::I16 => build_stream::<i16>(config, &device, &device_config, frame_tx),
        cpal::SampleFormat::U16 => build_stream::<u16>(config, &device, &device_config, frame_tx),
        other => Err(CaptureError::Stream(format!(
            "unsupported input sample format {other:?}"
        ))),
    }
}

fn input_device(name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    match name {
        Some(name) => {
            let mut devices = host
                .input_devices()
                .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
            devices
                .find(|d| d.name().is_ok_and(|n| n == name))
                .ok_or_else(|| {
                    CaptureError::DeviceUnavailable(format!("input device '{name}' not found"))
                })
        }
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".to_string())),
    }
}

fn build_stream<T>(
    config: &MicrophoneConfig,
    device: &cpal::Device,
    device_config: &cpal::SupportedStreamConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = device_config.channels() as usize;
    let device_rate = device_config.sample_rate().0;
    let stream_config: cpal::StreamConfig = device_config.clone().into();

    // Work in 20 ms chunks at the device rate; resample each chunk to the
    // engine rate when they differ.
    let chunk = (device_rate as usize * config.frame_ms as usize) / 1000;
    let frame_len = (config.sample_rate as usize * config.frame_ms as usize) / 1000;

    let mut resampler = if device_rate != config.sample_rate {
        let resampler =
            FftFixedIn::<f32>::new(device_rate as usize, config.sample_rate as usize, chunk, 2, 1)
                .map_err(|e| CaptureError::Stream(format!("resampler init failed: {e}")))?;
        tracing::debug!(from = device_rate, to = config.sample_rate, "resampling input");
        Some(resampler)
    } else {
        None
    };

    let mut mono: Vec<f32> = Vec::with_capacity(chunk * 2);
    let mut pending: Vec<f32> = Vec::with_capacity(frame_len * 2);
    let mut sequence = 0u64;

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                mono.extend(downmix(data, channels));

                while mono.len() >= chunk {
                    let chunk_samples: Vec<f32> = mono.drain(..chunk).collect();
                    match &mut resampler {
                        Some(resampler) => match resampler.process(&[chunk_samples], None) {
                            Ok(mut output) => pending.append(&mut output[0]),
                            Err(e) => {
                                tracing::warn!(error = %e, "resampling failed, dropping chunk")
                            }
                        },
                        None => pending.extend(chunk_samples),
                    }

                    while pending.len() >= frame_len {
                        let frame: Vec<f32> = pending.drain(..frame_len).collect();
                        // The audio callback must never block; a full
                        // channel just drops the frame.
                        if frame_tx
                            .try_send(AudioFrame::new(frame, sequence))
                            .is_err()
                        {
                            tracing::warn!(sequence, "frame channel full, dropping frame");
                        }
                        sequence += 1;
                    }
                }
            },
            |err| tracing::warn!(error = %err, "input stream error"),
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                CaptureError::DeviceUnavailable("device not available".to_string())
            }
            other => CaptureError::Stream(other.to_string()),
        })?;

    stream
        .play()
        .map_err(|e| CaptureError::Stream(e.to_string()))?;

    Ok(stream)
}

/// Average interleaved channels down to mono f32.
fn downmix<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    if channels <= 1 {
        return data.iter().map(|&s| f32::from_sample(s)).collect();
    }
    data.chunks(channels)
        .map(|frame| {
            frame.iter().map(|&s| f32::from_sample(s)).sum::<f32>() / frame.len() as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_mono_passthrough() {
        let samples = vec![0.1f32, -0.2, 0.3];
        assert_eq!(downmix(&samples, 1), samples);
    }

    #[test]
    fn downmix_stereo_averages() {
        let samples = vec![0.2f32, 0.4, -1.0, 1.0];
        let mono = downmix(&samples, 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
    }

    #[test]
    fn config_from_settings_uses_device_and_rate() {
        let settings = AudioSettings {
            input_device: Some("USB Mic".to_string()),
            ..Default::default()
        };
        let config = MicrophoneConfig::from_settings(&settings);
        assert_eq!(config.device_name.as_deref(), Some("USB Mic"));
        assert_eq!(config.sample_rate, 16_000);
        assert_eq!(config.frame_ms, 20);
    }
}
