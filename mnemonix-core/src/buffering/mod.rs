//! Lock-free SPSC ring buffer for microphone samples.
//!
//! The cpal input callback pushes mono f32 samples with a wait-free
//! `push_slice`; the live session worker drains them, resamples to 16 kHz and
//! cuts fixed-size frames for the streaming API.

pub mod chunk;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the session worker.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// 2^20 f32 samples ≈ 21.8 s at 48 kHz. The worker drains every few
/// milliseconds, so this only matters if the transport stalls.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_capture_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
