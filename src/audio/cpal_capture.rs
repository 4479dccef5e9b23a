//! cpal-based microphone capture
//!
//! cpal::Stream is not Send, so the stream lives on a dedicated thread.
//! Chunks are streamed to the caller as they arrive and the full recording
//! is handed back on stop.

use super::{AudioCapture, SAMPLE_RATE};
use crate::error::AudioError;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Commands sent to the audio capture thread
enum CaptureCommand {
    Stop(oneshot::Sender<Vec<f32>>),
}

/// Where converted chunks go
struct ChunkSink {
    recording: Arc<Mutex<Vec<f32>>>,
    tx: mpsc::Sender<Vec<f32>>,
}

impl ChunkSink {
    fn push(&self, chunk: Vec<f32>) {
        if chunk.is_empty() {
            return;
        }
        if let Ok(mut recording) = self.recording.lock() {
            recording.extend_from_slice(&chunk);
        }
        // The listener may lag or be gone; the full recording is kept regardless
        let _ = self.tx.try_send(chunk);
    }
}

pub struct CpalCapture {
    device: String,
    cmd_tx: Option<std::sync::mpsc::Sender<CaptureCommand>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl CpalCapture {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            cmd_tx: None,
            thread_handle: None,
        }
    }
}

/// Find an input device by exact, case-insensitive, then substring match
///
/// Accepts full cpal names ("alsa_input.pci-0000_00_1f.3.analog-stereo")
/// as well as fragments ("analog-stereo").
fn find_audio_device(host: &cpal::Host, device_name: &str) -> Result<cpal::Device, AudioError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let devices: Vec<(String, cpal::Device)> = host
        .input_devices()
        .map_err(|e| AudioError::Connection(e.to_string()))?
        .filter_map(|d| d.name().ok().map(|name| (name, d)))
        .collect();

    let search_lower = device_name.to_lowercase();
    let position = devices
        .iter()
        .position(|(name, _)| name == device_name)
        .or_else(|| {
            devices
                .iter()
                .position(|(name, _)| name.to_lowercase() == search_lower)
        })
        .or_else(|| {
            devices
                .iter()
                .position(|(name, _)| name.to_lowercase().contains(&search_lower))
        });

    match position {
        Some(index) => {
            let (name, device) = devices.into_iter().nth(index).ok_or_else(|| {
                AudioError::DeviceNotFound(device_name.to_string())
            })?;
            tracing::debug!("Matched audio device '{}' for '{}'", name, device_name);
            Ok(device)
        }
        None => {
            let names: Vec<&str> = devices.iter().map(|(name, _)| name.as_str()).collect();
            tracing::warn!("Available input devices: {}", names.join(", "));
            Err(AudioError::DeviceNotFound(device_name.to_string()))
        }
    }
}

#[async_trait::async_trait]
impl AudioCapture for CpalCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>, AudioError> {
        let (chunk_tx, chunk_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel::<CaptureCommand>();
        let (started_tx, started_rx) = oneshot::channel::<Result<(), AudioError>>();
        let device_name = self.device.clone();

        let thread_handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let samples = Arc::new(Mutex::new(Vec::<f32>::new()));
                let stream = match open_stream(&device_name, samples.clone(), chunk_tx) {
                    Ok(stream) => {
                        let _ = started_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = started_tx.send(Err(e));
                        return;
                    }
                };

                tracing::debug!("Audio capture thread started");

                if let Ok(CaptureCommand::Stop(response_tx)) = cmd_rx.recv() {
                    drop(stream);
                    let collected = std::mem::take(
                        &mut *samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
                    );
                    let _ = response_tx.send(collected);
                }

                tracing::debug!("Audio capture thread stopped");
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match started_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                return Err(e);
            }
            Err(_) => {
                return Err(AudioError::StreamError(
                    "capture thread exited during startup".to_string(),
                ))
            }
        }

        self.cmd_tx = Some(cmd_tx);
        self.thread_handle = Some(thread_handle);
        Ok(chunk_rx)
    }

    async fn stop(&mut self) -> Result<Vec<f32>, AudioError> {
        let samples = match self.cmd_tx.take() {
            Some(cmd_tx) => {
                let (response_tx, response_rx) = oneshot::channel();
                if cmd_tx.send(CaptureCommand::Stop(response_tx)).is_err() {
                    Vec::new()
                } else {
                    match tokio::time::timeout(Duration::from_secs(2), response_rx).await {
                        Ok(Ok(samples)) => samples,
                        Ok(Err(_)) => {
                            return Err(AudioError::StreamError("Channel closed".to_string()))
                        }
                        Err(_) => {
                            return Err(AudioError::StreamError(
                                "Timed out stopping the capture thread".to_string(),
                            ))
                        }
                    }
                }
            }
            None => Vec::new(),
        };

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }

        tracing::debug!(
            "Audio capture stopped: {} samples ({:.2}s)",
            samples.len(),
            samples.len() as f32 / SAMPLE_RATE as f32
        );

        if samples.is_empty() {
            return Err(AudioError::EmptyRecording);
        }
        Ok(samples)
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        // Closing the command channel ends the capture thread
        self.cmd_tx.take();
    }
}

/// Open the configured device and start streaming; runs on the capture thread
fn open_stream(
    device_name: &str,
    samples: Arc<Mutex<Vec<f32>>>,
    tx: mpsc::Sender<Vec<f32>>,
) -> Result<cpal::Stream, AudioError> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let device = if device_name == "default" {
        host.default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("default".to_string()))?
    } else {
        find_audio_device(&host, device_name)?
    };
    tracing::info!(
        "Using audio device: {}",
        device.name().unwrap_or_else(|_| "unknown".to_string())
    );

    let supported_config = device
        .default_input_config()
        .map_err(|e| AudioError::Connection(e.to_string()))?;
    let sample_format = supported_config.sample_format();
    tracing::debug!(
        "Device config: {} Hz, {} channel(s), format: {:?}",
        supported_config.sample_rate().0,
        supported_config.channels(),
        sample_format
    );

    let stream_config = cpal::StreamConfig {
        channels: supported_config.channels(),
        sample_rate: supported_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    let converter = MonoConverter::new(
        usize::from(supported_config.channels()),
        supported_config.sample_rate().0,
        SAMPLE_RATE,
    );
    let sink = ChunkSink {
        recording: samples,
        tx,
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, converter, sink)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, converter, sink)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, converter, sink)?,
        format => {
            return Err(AudioError::StreamError(format!(
                "Unsupported sample format: {:?}",
                format
            )))
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;
    Ok(stream)
}

/// Build an input stream for one device sample type
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut converter: MonoConverter,
    sink: ChunkSink,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    use cpal::traits::DeviceTrait;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let chunk = converter.convert(
                    data.iter()
                        .map(|&s| <f32 as cpal::FromSample<T>>::from_sample_(s)),
                );
                sink.push(chunk);
            },
            |err| tracing::error!("Audio stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

/// Interleaved device frames to mono at the recognizer's rate.
///
/// Linear interpolation whose phase carries over from one callback to the
/// next, so chunk boundaries do not add or drop samples.
struct MonoConverter {
    channels: usize,
    /// Source samples per output sample
    step: f64,
    /// Position of the next output sample, relative to `previous`
    position: f64,
    /// Last mono sample of the previous callback
    previous: Option<f32>,
}

impl MonoConverter {
    fn new(channels: usize, source_rate: u32, target_rate: u32) -> Self {
        Self {
            channels: channels.max(1),
            step: f64::from(source_rate) / f64::from(target_rate.max(1)),
            position: 0.0,
            previous: None,
        }
    }

    fn convert(&mut self, interleaved: impl Iterator<Item = f32>) -> Vec<f32> {
        let mut mono = Vec::new();
        let mut frame_sum = 0.0;
        let mut in_frame = 0;
        for sample in interleaved {
            frame_sum += sample;
            in_frame += 1;
            if in_frame == self.channels {
                mono.push(frame_sum / self.channels as f32);
                frame_sum = 0.0;
                in_frame = 0;
            }
        }

        if (self.step - 1.0).abs() < f64::EPSILON {
            return mono;
        }

        // Index 0 is the carried-over sample; fresh input starts at 1
        let mut source = Vec::with_capacity(mono.len() + 1);
        match self.previous {
            Some(previous) => source.push(previous),
            None => {
                let Some(&first) = mono.first() else {
                    return Vec::new();
                };
                source.push(first);
            }
        }
        source.extend_from_slice(&mono);

        let mut output = Vec::with_capacity((mono.len() as f64 / self.step) as usize + 1);
        let last = (source.len() - 1) as f64;
        while self.position < last {
            let index = self.position.floor() as usize;
            let frac = (self.position - index as f64) as f32;
            output.push(source[index] * (1.0 - frac) + source[index + 1] * frac);
            self.position += self.step;
        }

        self.position -= last;
        self.previous = source.last().copied();
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_mixes_to_mono() {
        let mut converter = MonoConverter::new(2, 16000, 16000);
        let out = converter.convert([1.0, 3.0, -1.0, 1.0].into_iter());
        assert_eq!(out, vec![2.0, 0.0]);
    }

    #[test]
    fn test_downsample_ratio_holds_across_chunks() {
        let mut converter = MonoConverter::new(1, 48000, 16000);
        let total: usize = (0..10)
            .map(|_| converter.convert(std::iter::repeat(0.5).take(480)).len())
            .sum();
        // 4800 input samples at 3:1
        assert!((1599..=1601).contains(&total), "got {}", total);
    }

    #[test]
    fn test_upsample_interpolates() {
        let mut converter = MonoConverter::new(1, 8000, 16000);
        let first = converter.convert([0.0, 1.0].into_iter());
        let second = converter.convert([2.0].into_iter());
        let all: Vec<f32> = first.into_iter().chain(second).collect();
        assert_eq!(all, vec![0.0, 0.0, 0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn test_empty_callback() {
        let mut converter = MonoConverter::new(2, 44100, 16000);
        assert!(converter.convert(std::iter::empty()).is_empty());
    }
}
