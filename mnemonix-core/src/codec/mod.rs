//! PCM codec: base64 text ⇄ s16le bytes ⇄ f32 playable buffers.
//!
//! The free functions are the plain conversions. [`PcmCodec`] wraps the same
//! operations with a shared [`CodecDiagnostics`] so schedulers, players and
//! tests can count degraded frames instead of scraping logs.

pub mod pcm;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::buffering::chunk::PlayableBuffer;

pub use pcm::I16_SCALE;

/// Counters for every input the codec had to degrade.
#[derive(Debug, Default)]
pub struct CodecDiagnostics {
    pub base64_failures: AtomicUsize,
    pub odd_trailing_bytes: AtomicUsize,
    pub empty_buffers: AtomicUsize,
    pub clamped_samples: AtomicUsize,
}

impl CodecDiagnostics {
    pub fn reset(&self) {
        self.base64_failures.store(0, Ordering::Relaxed);
        self.odd_trailing_bytes.store(0, Ordering::Relaxed);
        self.empty_buffers.store(0, Ordering::Relaxed);
        self.clamped_samples.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CodecSnapshot {
        CodecSnapshot {
            base64_failures: self.base64_failures.load(Ordering::Relaxed),
            odd_trailing_bytes: self.odd_trailing_bytes.load(Ordering::Relaxed),
            empty_buffers: self.empty_buffers.load(Ordering::Relaxed),
            clamped_samples: self.clamped_samples.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecSnapshot {
    pub base64_failures: usize,
    pub odd_trailing_bytes: usize,
    pub empty_buffers: usize,
    pub clamped_samples: usize,
}

/// Codec handle carrying a diagnostics sink. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct PcmCodec {
    diagnostics: Arc<CodecDiagnostics>,
}

impl PcmCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing counter set, e.g. one owned by a session.
    pub fn with_diagnostics(diagnostics: Arc<CodecDiagnostics>) -> Self {
        Self { diagnostics }
    }

    pub fn diagnostics(&self) -> &Arc<CodecDiagnostics> {
        &self.diagnostics
    }

    pub fn decode_base64_to_bytes(&self, text: &str) -> Vec<u8> {
        pcm::decode_base64_to_bytes(text, &self.diagnostics)
    }

    pub fn encode_bytes_to_base64(&self, bytes: &[u8]) -> String {
        pcm::encode_bytes_to_base64(bytes)
    }

    pub fn bytes_to_playable_buffer(
        &self,
        bytes: &[u8],
        sample_rate: u32,
        channel_count: u16,
    ) -> Option<PlayableBuffer> {
        pcm::bytes_to_playable_buffer(bytes, sample_rate, channel_count, &self.diagnostics)
    }

    pub fn float_samples_to_base64_pcm(&self, samples: &[f32]) -> String {
        pcm::float_samples_to_base64_pcm(samples, &self.diagnostics)
    }

    /// Base64 chunk straight to a playable buffer; `None` means nothing to play.
    pub fn decode_chunk(
        &self,
        text: &str,
        sample_rate: u32,
        channel_count: u16,
    ) -> Option<PlayableBuffer> {
        let bytes = self.decode_base64_to_bytes(text);
        self.bytes_to_playable_buffer(&bytes, sample_rate, channel_count)
    }
}

/// Decode standard base64; malformed input yields an empty buffer.
pub fn decode_base64_to_bytes(text: &str) -> Vec<u8> {
    pcm::decode_base64_to_bytes(text, &CodecDiagnostics::default())
}

pub fn encode_bytes_to_base64(bytes: &[u8]) -> String {
    pcm::encode_bytes_to_base64(bytes)
}

/// Interpret `bytes` as interleaved s16le; `None` when there is nothing to play.
pub fn bytes_to_playable_buffer(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: u16,
) -> Option<PlayableBuffer> {
    pcm::bytes_to_playable_buffer(bytes, sample_rate, channel_count, &CodecDiagnostics::default())
}

/// Encode f32 capture samples as base64 s16le, clipping out-of-range values.
pub fn float_samples_to_base64_pcm(samples: &[f32]) -> String {
    pcm::float_samples_to_base64_pcm(samples, &CodecDiagnostics::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_diagnostics_accumulate_across_clones() {
        let codec = PcmCodec::new();
        let clone = codec.clone();
        codec.decode_base64_to_bytes("!!!!");
        clone.decode_base64_to_bytes("****");
        assert_eq!(codec.diagnostics().snapshot().base64_failures, 2);

        codec.diagnostics().reset();
        assert_eq!(clone.diagnostics().snapshot(), CodecSnapshot::default());
    }

    #[test]
    fn decode_chunk_of_empty_text_is_none() {
        let codec = PcmCodec::new();
        assert!(codec.decode_chunk("   ", 24_000, 1).is_none());
        assert_eq!(codec.diagnostics().snapshot().base64_failures, 0);
    }
}
