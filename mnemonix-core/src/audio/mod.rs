//! Audio device I/O: microphone capture, output contexts, resampling.
//!
//! # Capture constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not allocate after warm-up, block on a lock, or perform I/O. Capture
//! therefore writes down-mixed mono f32 straight into an SPSC ring producer
//! whose `push_slice` is lock-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms, so `MicCapture` must be
//! created and dropped on the same thread. The live session opens it inside
//! its blocking worker.

pub mod device;
pub mod output;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};

use crate::{
    buffering::AudioProducer,
    error::{MnemonixError, Result},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Average interleaved frames down to mono into `mono` (resized, not reallocated
/// once warm).
pub fn downmix_into<T: Copy>(
    data: &[T],
    channels: usize,
    mono: &mut Vec<f32>,
    to_f32: impl Fn(T) -> f32,
) {
    let ch = channels.max(1);
    let frames = data.len() / ch;
    mono.resize(frames, 0.0);
    for (f, out) in mono.iter_mut().enumerate() {
        let base = f * ch;
        let sum: f32 = data[base..base + ch].iter().map(|&s| to_f32(s)).sum();
        *out = sum / ch as f32;
    }
}

/// Handle to an active microphone stream.
///
/// **Not `Send`**: create and drop this type on the same OS thread.
pub struct MicCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Set to `false` to make the callback a no-op.
    running: Arc<AtomicBool>,
    /// Capture rate reported by the device (Hz).
    pub sample_rate: u32,
}

impl MicCapture {
    /// Open an input device by preferred name, otherwise the default input
    /// device, otherwise the first one available.
    ///
    /// # Errors
    /// `NoDefaultInputDevice` when no microphone exists (or permission was
    /// denied), `AudioStream` if cpal fails to build the stream.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();

        let preferred = preferred_device_name.and_then(|wanted| {
            let found = match host.input_devices() {
                Ok(mut devices) => {
                    devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                    None
                }
            };
            if found.is_none() {
                warn!("preferred input device '{}' not found, falling back", wanted);
            }
            found
        });

        let device = if let Some(device) = preferred {
            device
        } else if let Some(default) = host.default_input_device() {
            default
        } else {
            let mut devices = host
                .input_devices()
                .map_err(|e| MnemonixError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(MnemonixError::NoDefaultInputDevice)?;
            warn!("no default input device, falling back to first available input");
            fallback
        };

        let supported = device
            .default_input_config()
            .map_err(|e| MnemonixError::AudioDevice(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        info!(
            device = device.name().unwrap_or_default().as_str(),
            sample_rate,
            channels,
            "opening input device"
        );

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let flag = Arc::clone(&running);
        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_capture_stream::<f32>(&device, &config, producer, flag),
            SampleFormat::I16 => build_capture_stream::<i16>(&device, &config, producer, flag),
            SampleFormat::U8 => build_capture_stream::<u8>(&device, &config, producer, flag),
            fmt => {
                return Err(MnemonixError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| MnemonixError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| MnemonixError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    #[cfg(feature = "audio-cpal")]
    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(producer, running, None)
    }

    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(feature = "audio-cpal")]
fn build_capture_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    use crate::buffering::Producer;

    let channels = config.channels as usize;
    let mut mono: Vec<f32> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _info: &cpal::InputCallbackInfo| {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            downmix_into(data, channels, &mut mono, |s| s.to_sample::<f32>());
            let written = producer.push_slice(&mono);
            if written < mono.len() {
                warn!("capture ring full: dropped {} frames", mono.len() - written);
            }
        },
        |err| error!("input stream error: {err}"),
        None,
    )
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl MicCapture {
    pub fn open_with_preference(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(MnemonixError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(producer, running, None)
    }
}
