//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Two directions need it:
//!
//! - capture: microphones run at the device rate (commonly 48 kHz) while the
//!   live API wants 16 kHz mono frames;
//! - output: synthesized speech arrives at 24 kHz but the output device may
//!   only open at 44.1 or 48 kHz.
//!
//! When source rate == target rate, `RateConverter` is a passthrough and no
//! rubato session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{MnemonixError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate.
    resampler: Option<FastFixedIn<f32>>,
    /// Partial input held between `process` calls.
    input_buf: Vec<f32>,
    /// Input frames rubato expects per call.
    chunk_size: usize,
    /// `[1][output_frames_max]`, reused across calls.
    output_buf: Vec<Vec<f32>>,
    ratio: f64,
}

impl RateConverter {
    /// # Errors
    /// Returns `MnemonixError::AudioDevice` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        let ratio = target_rate as f64 / source_rate.max(1) as f64;

        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                ratio,
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| MnemonixError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::debug!(source_rate, target_rate, chunk_size, max_out, "resampler ready");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
            ratio,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Input accumulates until a full `chunk_size` block is available; any
    /// remainder is kept for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Resample a complete signal in one go, flushing the tail with silence
    /// and trimming the result to `len * ratio` frames.
    ///
    /// rubato's lead-in (`output_delay` frames) is dropped so the output stays
    /// time-aligned with the input.
    pub fn convert_all(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(delay) = self.resampler.as_ref().map(|r| r.output_delay()) else {
            return samples.to_vec();
        };

        let expected = (samples.len() as f64 * self.ratio).round() as usize;
        let mut out = self.process(samples);

        // Keep pushing silence until rubato's delay line has released the tail.
        while out.len() < delay + expected {
            let pad = self.chunk_size - self.input_buf.len() % self.chunk_size;
            let flushed = self.process(&vec![0.0; pad]);
            if flushed.is_empty() {
                break;
            }
            out.extend_from_slice(&flushed);
        }

        out.drain(..delay.min(out.len()));
        out.resize(expected, 0.0);
        out
    }

    /// Returns `true` when both rates match (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
