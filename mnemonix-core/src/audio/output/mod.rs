//! Output audio contexts: the clock and scheduling primitive behind every
//! playback stream.
//!
//! A context is injected into each `PlaybackScheduler` and `NarrationPlayer`;
//! nothing in the crate reaches for a process-wide device. Give every
//! independent stream its own context.
//!
//! | Context | Clock |
//! |---------|-------|
//! | [`VirtualOutput`] | advanced explicitly; offline rendering, WAV export, tests |
//! | [`CpalOutput`] | driven by the device callback (feature `audio-cpal`) |

pub mod timeline;
pub mod virtual_output;

#[cfg(feature = "audio-cpal")]
pub mod cpal_output;

#[cfg(feature = "audio-cpal")]
pub use cpal_output::CpalOutput;

pub use timeline::{SourceHandle, Timeline};
pub use virtual_output::VirtualOutput;

use std::sync::Arc;

use crate::{audio::resample::RateConverter, buffering::chunk::PlayableBuffer, error::Result};

/// Resampler block size used when adapting buffers to the output rate.
const FIT_CHUNK: usize = 1024;

/// Contract for an output clock that can play buffers at absolute times.
pub trait OutputContext: Send + Sync {
    /// Rate of the output clock in Hz.
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Current position of the output clock in seconds. Never decreases.
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to start at `start_at` seconds on this clock.
    /// A start time already in the past plays immediately.
    ///
    /// # Errors
    /// Returns an error if the buffer cannot be adapted to the output format.
    fn schedule(&self, buffer: Arc<PlayableBuffer>, start_at: f64) -> Result<SourceHandle>;
}

/// Resample every channel of `buffer` to `target_rate` if it differs.
pub fn fit_to_rate(buffer: Arc<PlayableBuffer>, target_rate: u32) -> Result<Arc<PlayableBuffer>> {
    if buffer.sample_rate == target_rate {
        return Ok(buffer);
    }

    let mut channels = Vec::with_capacity(buffer.channel_count());
    for samples in &buffer.channels {
        let mut rc = RateConverter::new(buffer.sample_rate, target_rate, FIT_CHUNK)?;
        channels.push(rc.convert_all(samples));
    }
    Ok(Arc::new(PlayableBuffer::new(channels, target_rate)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_to_rate_keeps_matching_buffers_untouched() {
        let buf = Arc::new(PlayableBuffer::mono(vec![0.2; 100], 24_000));
        let fitted = fit_to_rate(Arc::clone(&buf), 24_000).unwrap();
        assert!(Arc::ptr_eq(&buf, &fitted));
    }

    #[test]
    fn fit_to_rate_preserves_duration() {
        let buf = Arc::new(PlayableBuffer::mono(vec![0.2; 24_000], 24_000));
        let fitted = fit_to_rate(buf, 48_000).unwrap();
        assert_eq!(fitted.sample_rate, 48_000);
        assert!((fitted.duration_secs() - 1.0).abs() < 1e-9);
    }
}
