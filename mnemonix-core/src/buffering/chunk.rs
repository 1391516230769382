//! Decoded audio ready to hand to an output context.

/// Planar f32 audio at a known sample rate, samples in [-1.0, 1.0].
///
/// Owned by whichever scheduler or player decoded it. Output contexts receive
/// it behind an `Arc` so the mixer can read it without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableBuffer {
    /// One `Vec` per channel, all of equal length.
    pub channels: Vec<Vec<f32>>,
    /// Sample rate in Hz (24000 for synthesized speech).
    pub sample_rate: u32,
}

impl PlayableBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        debug_assert!(
            channels.windows(2).all(|w| w[0].len() == w[1].len()),
            "all channels must hold the same number of frames"
        );
        Self {
            channels,
            sample_rate,
        }
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    /// Frames per channel.
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples of channel `c`, or an empty slice when out of range.
    pub fn channel(&self, c: usize) -> &[f32] {
        self.channels.get(c).map_or(&[], Vec::as_slice)
    }

    /// Returns the duration of this buffer in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Returns true if the buffer contains no frames.
    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_follows_frame_count() {
        let buf = PlayableBuffer::mono(vec![0.0; 12_000], 24_000);
        assert_eq!(buf.frame_count(), 12_000);
        assert!((buf.duration_secs() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_channel_is_empty() {
        let buf = PlayableBuffer::new(vec![vec![0.1, 0.2], vec![0.3, 0.4]], 16_000);
        assert_eq!(buf.channel(1), &[0.3, 0.4]);
        assert!(buf.channel(2).is_empty());
    }
}
