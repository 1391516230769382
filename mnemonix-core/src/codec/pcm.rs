//! Conversions between base64 text, s16le bytes and f32 sample buffers.
//!
//! Nothing here returns an error. A corrupt chunk in the middle of a live
//! stream must not tear the session down, so every malformed-input path
//! degrades to an empty (or `None`) result, logs a warning and bumps a counter
//! on the supplied [`CodecDiagnostics`].

use std::sync::atomic::Ordering;

use base64::{
    alphabet,
    engine::{general_purpose::STANDARD, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use tracing::{debug, warn};

use super::CodecDiagnostics;
use crate::buffering::chunk::PlayableBuffer;

/// Full-scale divisor for signed 16-bit PCM.
pub const I16_SCALE: f32 = 32768.0;

/// Standard alphabet, padding optional and non-zero trailing bits accepted on decode.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

pub(crate) fn decode_base64_to_bytes(text: &str, diag: &CodecDiagnostics) -> Vec<u8> {
    // Line-wrapped payloads are common from storage; whitespace carries no data.
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Vec::new();
    }

    match LENIENT.decode(compact.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            diag.base64_failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, input_len = text.len(), "base64 decode failed, dropping chunk");
            Vec::new()
        }
    }
}

pub(crate) fn encode_bytes_to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub(crate) fn bytes_to_playable_buffer(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: u16,
    diag: &CodecDiagnostics,
) -> Option<PlayableBuffer> {
    if bytes.is_empty() || channel_count == 0 {
        diag.empty_buffers.fetch_add(1, Ordering::Relaxed);
        return None;
    }

    let even_len = bytes.len() & !1;
    if even_len != bytes.len() {
        diag.odd_trailing_bytes.fetch_add(1, Ordering::Relaxed);
        debug!(len = bytes.len(), "odd-length PCM payload, dropping trailing byte");
    }

    let samples: Vec<i16> = bytes[..even_len]
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let channels = channel_count as usize;
    let frame_count = samples.len() / channels;
    if frame_count == 0 {
        diag.empty_buffers.fetch_add(1, Ordering::Relaxed);
        return None;
    }

    let planar = (0..channels)
        .map(|c| {
            (0..frame_count)
                .map(|i| samples[i * channels + c] as f32 / I16_SCALE)
                .collect()
        })
        .collect();

    Some(PlayableBuffer::new(planar, sample_rate))
}

pub(crate) fn float_samples_to_base64_pcm(samples: &[f32], diag: &CodecDiagnostics) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    let mut clamped = 0usize;

    for &sample in samples {
        let scaled = sample * I16_SCALE;
        if !(i16::MIN as f32..=i16::MAX as f32).contains(&scaled) {
            clamped += 1;
        }
        // `as` truncates toward zero and saturates at the i16 bounds; NaN maps to 0.
        let value = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    if clamped > 0 {
        diag.clamped_samples.fetch_add(clamped, Ordering::Relaxed);
        debug!(clamped, total = samples.len(), "clipped out-of-range capture samples");
    }

    encode_bytes_to_base64(&bytes)
}
