//! Output context with a manually advanced clock.
//!
//! Nothing is played: `advance` renders the timeline into an optional
//! recording, which can be written out as a 16-bit WAV file. Used for offline
//! narration export and for exercising schedulers deterministically.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::{fit_to_rate, OutputContext, SourceHandle, Timeline};
use crate::{
    buffering::chunk::PlayableBuffer,
    error::{MnemonixError, Result},
};

/// Frames rendered per internal block while advancing.
const RENDER_BLOCK: usize = 1024;

pub struct VirtualOutput {
    timeline: Mutex<Timeline>,
    /// Interleaved rendered samples, when recording is enabled.
    recording: Mutex<Option<Vec<f32>>>,
}

impl VirtualOutput {
    /// Mono context at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self::with_channels(sample_rate, 1)
    }

    pub fn with_channels(sample_rate: u32, channels: u16) -> Self {
        Self {
            timeline: Mutex::new(Timeline::new(sample_rate, channels)),
            recording: Mutex::new(None),
        }
    }

    /// Keep everything rendered from now on for `recorded_samples` / `write_wav`.
    pub fn recording(self) -> Self {
        *self.recording.lock() = Some(Vec::new());
        self
    }

    /// Advance the clock by `seconds`, rendering every scheduled voice.
    pub fn advance(&self, seconds: f64) {
        let rate = self.sample_rate() as f64;
        self.advance_frames((seconds.max(0.0) * rate).round() as u64);
    }

    pub fn advance_frames(&self, mut frames: u64) {
        let mut timeline = self.timeline.lock();
        let ch = timeline.channels() as usize;
        let mut block = vec![0f32; RENDER_BLOCK * ch];

        while frames > 0 {
            let n = (frames as usize).min(RENDER_BLOCK);
            let out = &mut block[..n * ch];
            timeline.render(out);
            if let Some(rec) = self.recording.lock().as_mut() {
                rec.extend_from_slice(out);
            }
            frames -= n as u64;
        }
    }

    /// Voices scheduled and not yet finished.
    pub fn active_voices(&self) -> usize {
        self.timeline.lock().active_voices()
    }

    /// Interleaved samples rendered while recording (empty when disabled).
    pub fn recorded_samples(&self) -> Vec<f32> {
        self.recording.lock().clone().unwrap_or_default()
    }

    /// Write the recording as 16-bit PCM WAV.
    ///
    /// # Errors
    /// `MnemonixError::AudioStream` when recording was never enabled or the
    /// file cannot be written.
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = hound::WavSpec {
            channels: self.channels(),
            sample_rate: self.sample_rate(),
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let recording = self.recording.lock();
        let samples = recording.as_ref().ok_or_else(|| {
            MnemonixError::AudioStream("virtual output was not recording".into())
        })?;
        let mut writer = hound::WavWriter::create(path, spec)
            .map_err(|e| MnemonixError::AudioStream(format!("wav create: {e}")))?;
        for &s in samples.iter() {
            let value = (s * 32767.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            writer
                .write_sample(value)
                .map_err(|e| MnemonixError::AudioStream(format!("wav write: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| MnemonixError::AudioStream(format!("wav finalize: {e}")))?;

        info!(path = %path.display(), samples = samples.len(), "wrote narration wav");
        Ok(())
    }
}

impl OutputContext for VirtualOutput {
    fn sample_rate(&self) -> u32 {
        self.timeline.lock().sample_rate()
    }

    fn channels(&self) -> u16 {
        self.timeline.lock().channels()
    }

    fn current_time(&self) -> f64 {
        self.timeline.lock().current_time()
    }

    fn schedule(&self, buffer: Arc<PlayableBuffer>, start_at: f64) -> Result<SourceHandle> {
        let buffer = fit_to_rate(buffer, self.sample_rate())?;
        Ok(self.timeline.lock().add_voice(buffer, start_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_clock_and_retires_voices() {
        let out = VirtualOutput::new(24_000);
        let handle = out
            .schedule(Arc::new(PlayableBuffer::mono(vec![0.1; 2_400], 24_000)), 0.0)
            .unwrap();
        assert_eq!(out.active_voices(), 1);

        out.advance(0.05);
        assert!((out.current_time() - 0.05).abs() < 1e-9);
        assert!(!handle.has_ended());

        out.advance(0.05);
        assert!(handle.has_ended());
        assert_eq!(out.active_voices(), 0);
    }

    #[test]
    fn recording_round_trips_through_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("narration.wav");

        let out = VirtualOutput::new(16_000).recording();
        out.schedule(Arc::new(PlayableBuffer::mono(vec![0.5; 160], 16_000)), 0.0)
            .unwrap();
        out.advance(0.02);
        out.write_wav(&path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.len(), 320);
    }

    #[test]
    fn write_wav_without_recording_fails() {
        let dir = tempfile::tempdir().unwrap();
        let out = VirtualOutput::new(16_000);
        assert!(out.write_wav(&dir.path().join("x.wav")).is_err());
    }
}
