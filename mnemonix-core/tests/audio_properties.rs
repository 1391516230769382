use std::sync::Arc;

use approx::assert_abs_diff_eq;
use mnemonix_core::codec::{
    bytes_to_playable_buffer, decode_base64_to_bytes, encode_bytes_to_base64,
    float_samples_to_base64_pcm, PcmCodec,
};
use mnemonix_core::{OutputContext, PlaybackScheduler, VirtualOutput};

const SPEECH_RATE: u32 = 24_000;
const QUANTUM: f32 = 1.0 / 32768.0;

fn scheduler() -> (Arc<VirtualOutput>, PlaybackScheduler) {
    let output = Arc::new(VirtualOutput::new(SPEECH_RATE));
    let scheduler = PlaybackScheduler::new(
        Arc::clone(&output) as Arc<dyn OutputContext>,
        PcmCodec::new(),
        SPEECH_RATE,
        1,
    );
    (output, scheduler)
}

/// Base64 s16le chunk holding `seconds` of a quiet tone.
fn chunk(seconds: f64) -> String {
    let frames = (seconds * SPEECH_RATE as f64).round() as usize;
    let samples: Vec<f32> = (0..frames).map(|i| ((i % 48) as f32 / 48.0 - 0.5) * 0.2).collect();
    float_samples_to_base64_pcm(&samples)
}

#[test]
fn samples_survive_the_full_codec_path_within_one_quantum() {
    let samples: Vec<f32> = (0..=2000)
        .map(|i| -1.0 + i as f32 / 1000.0)
        .chain([0.0, 1e-6, -1e-6, 0.999_99, -0.999_99])
        .collect();

    let encoded = float_samples_to_base64_pcm(&samples);
    let bytes = decode_base64_to_bytes(&encode_bytes_to_base64(&decode_base64_to_bytes(&encoded)));
    let buffer = bytes_to_playable_buffer(&bytes, 16_000, 1).expect("non-empty");

    assert_eq!(buffer.frame_count(), samples.len());
    for (original, decoded) in samples.iter().zip(buffer.channel(0)) {
        assert_abs_diff_eq!(*original, *decoded, epsilon = QUANTUM);
    }
}

#[test]
fn odd_length_buffers_decode_like_their_even_prefix() {
    let bytes: Vec<u8> = (0u8..=40).collect();
    assert_eq!(bytes.len() % 2, 1);

    let odd = bytes_to_playable_buffer(&bytes, SPEECH_RATE, 1).expect("odd");
    let even = bytes_to_playable_buffer(&bytes[..bytes.len() - 1], SPEECH_RATE, 1).expect("even");
    assert_eq!(odd, even);

    // A single stray byte is nothing to play.
    assert!(bytes_to_playable_buffer(&[0x7f], SPEECH_RATE, 1).is_none());
}

#[test]
fn empty_inputs_yield_empty_results_not_errors() {
    assert!(decode_base64_to_bytes("").is_empty());
    assert!(decode_base64_to_bytes(" \n\t ").is_empty());
    assert!(bytes_to_playable_buffer(&[], SPEECH_RATE, 1).is_none());
}

#[test]
fn back_to_back_chunks_follow_the_cursor_despite_arrival_jitter() {
    let (output, mut scheduler) = scheduler();

    let first = scheduler.enqueue_chunk(&chunk(0.4)).unwrap().expect("first");
    output.advance(0.05);
    let second = scheduler.enqueue_chunk(&chunk(0.25)).unwrap().expect("second");
    output.advance(0.2);
    let third = scheduler.enqueue_chunk(&chunk(0.1)).unwrap().expect("third");

    assert_abs_diff_eq!(second.start_at, first.start_at + first.duration, epsilon = 1e-9);
    assert_abs_diff_eq!(
        third.start_at,
        first.start_at + first.duration + second.duration,
        epsilon = 1e-9
    );
    assert_eq!(scheduler.in_flight(), 3);
}

#[test]
fn interrupt_clears_everything_and_the_next_chunk_starts_now() {
    let (output, mut scheduler) = scheduler();
    for _ in 0..4 {
        scheduler.enqueue_chunk(&chunk(0.5)).unwrap();
    }
    output.advance(0.3);

    assert_eq!(scheduler.interrupt(), 4);
    assert_eq!(scheduler.in_flight(), 0);
    assert_eq!(scheduler.next_start_time(), 0.0);

    let next = scheduler.enqueue_chunk(&chunk(0.1)).unwrap().expect("next");
    assert_abs_diff_eq!(next.start_at, output.current_time(), epsilon = 1e-9);
    assert_abs_diff_eq!(next.start_at, 0.3, epsilon = 1e-9);

    // Stopped sources are silent from the next rendered block on.
    output.advance(0.01);
    assert_eq!(output.active_voices(), 1);
}

#[test]
fn one_second_of_synthesized_speech_decodes_to_24000_samples() {
    let payload = float_samples_to_base64_pcm(&vec![0.1; 24_000]);
    let buffer = PcmCodec::new()
        .decode_chunk(&payload, SPEECH_RATE, 1)
        .expect("speech");

    assert_eq!(buffer.frame_count(), 24_000);
    assert_abs_diff_eq!(buffer.duration_secs(), 1.0, epsilon = 1e-9);
}

#[test]
fn consecutive_live_chunks_span_exactly_their_total_duration() {
    let (output, mut scheduler) = scheduler();
    let first = scheduler.enqueue_chunk(&chunk(0.5)).unwrap().expect("0.5 s");
    let second = scheduler.enqueue_chunk(&chunk(0.3)).unwrap().expect("0.3 s");

    assert!(second.start_at >= first.end_at() - 1e-12, "chunks overlap");
    assert_abs_diff_eq!(second.end_at() - first.start_at, 0.8, epsilon = 1e-9);

    // On the clock: still playing just before 0.8 s, silent right after.
    output.advance(0.79);
    assert_eq!(output.active_voices(), 1);
    output.advance(0.02);
    assert_eq!(output.active_voices(), 0);
}
