//! Device-backed output context via cpal.
//!
//! # Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS, yet an output context must be
//! shareable between the session worker and the caller. The stream is
//! therefore built and owned by a dedicated thread that parks until the
//! context is dropped; only the `Timeline` is shared.
//!
//! # Callback contract
//!
//! The render callback never blocks: it `try_lock`s the timeline and emits
//! silence for that period if a scheduler is holding the lock.

use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::{fit_to_rate, OutputContext, SourceHandle, Timeline};
use crate::{
    buffering::chunk::PlayableBuffer,
    error::{MnemonixError, Result},
};

/// Handle to an open output device. Dropping it closes the stream.
pub struct CpalOutput {
    timeline: Arc<Mutex<Timeline>>,
    sample_rate: u32,
    channels: u16,
    shutdown_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the default output device, preferring `preferred_rate`.
    pub fn open_default(preferred_rate: u32) -> Result<Self> {
        Self::open_with_preference(preferred_rate, None)
    }

    /// Open an output device by name, falling back to the default device.
    ///
    /// Blocks until the stream is playing (or failed to open).
    ///
    /// # Errors
    /// `NoDefaultOutputDevice` when the host has no output, `AudioStream` if
    /// cpal cannot build or start the stream.
    pub fn open_with_preference(preferred_rate: u32, preferred_device: Option<&str>) -> Result<Self> {
        let timeline = Arc::new(Mutex::new(Timeline::new(preferred_rate, 1)));
        let (ready_tx, ready_rx) = bounded::<Result<(u32, u16)>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let worker_timeline = Arc::clone(&timeline);
        let preferred_device = preferred_device.map(str::to_string);
        let worker = std::thread::Builder::new()
            .name("mnemonix-output".into())
            .spawn(move || {
                match start_stream(preferred_rate, preferred_device.as_deref(), worker_timeline) {
                    Ok((stream, format)) => {
                        let _ = ready_tx.send(Ok(format));
                        // Park until the context is dropped; the stream drops on this thread.
                        let _ = shutdown_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok((sample_rate, channels))) => Ok(Self {
                timeline,
                sample_rate,
                channels,
                shutdown_tx: Some(shutdown_tx),
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => Err(MnemonixError::AudioStream(
                "output thread exited before opening the device".into(),
            )),
        }
    }
}

impl OutputContext for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn current_time(&self) -> f64 {
        self.timeline.lock().current_time()
    }

    fn schedule(&self, buffer: Arc<PlayableBuffer>, start_at: f64) -> Result<SourceHandle> {
        // Resample before taking the lock so the callback is never starved.
        let buffer = fit_to_rate(buffer, self.sample_rate)?;
        Ok(self.timeline.lock().add_voice(buffer, start_at))
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn start_stream(
    preferred_rate: u32,
    preferred_device: Option<&str>,
    timeline: Arc<Mutex<Timeline>>,
) -> Result<(Stream, (u32, u16))> {
    let host = cpal::default_host();

    let named = preferred_device.and_then(|wanted| {
        let found = host
            .output_devices()
            .ok()?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false));
        if found.is_none() {
            warn!("preferred output device '{}' not found, falling back", wanted);
        }
        found
    });

    let device = match named {
        Some(device) => device,
        None => host
            .default_output_device()
            .ok_or(MnemonixError::NoDefaultOutputDevice)?,
    };

    // Prefer a config that runs natively at the speech rate; otherwise take the
    // device default and let `schedule` resample.
    let supported = device
        .supported_output_configs()
        .ok()
        .and_then(|configs| {
            configs
                .filter(|r| {
                    r.min_sample_rate().0 <= preferred_rate && preferred_rate <= r.max_sample_rate().0
                })
                .filter(|r| {
                    matches!(
                        r.sample_format(),
                        SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
                    )
                })
                .min_by_key(|r| (r.sample_format() != SampleFormat::F32, r.channels()))
                .map(|r| r.with_sample_rate(SampleRate(preferred_rate)))
        })
        .map(Ok)
        .unwrap_or_else(|| device.default_output_config())
        .map_err(|e| MnemonixError::AudioDevice(e.to_string()))?;

    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    timeline.lock().reconfigure(sample_rate, channels);

    info!(
        device = device.name().unwrap_or_default().as_str(),
        sample_rate,
        channels,
        format = ?supported.sample_format(),
        "opening output device"
    );

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_render_stream::<f32>(&device, &config, timeline),
        SampleFormat::I16 => build_render_stream::<i16>(&device, &config, timeline),
        SampleFormat::U16 => build_render_stream::<u16>(&device, &config, timeline),
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

    Ok((stream, (sample_rate, channels)))
}

fn build_render_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    timeline: Arc<Mutex<Timeline>>,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            match timeline.try_lock() {
                Some(mut tl) => tl.render(&mut scratch),
                None => scratch.fill(0.0),
            }
            for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                *dst = T::from_sample(src);
            }
        },
        |err| error!("output stream error: {err}"),
        None,
    )
}
