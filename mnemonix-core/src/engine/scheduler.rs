//! Gapless playback of an ordered stream of encoded audio chunks.
//!
//! ## Cursor
//!
//! ```text
//! start_at        = max(next_start_time, output.current_time())
//! next_start_time = start_at + chunk.duration
//! ```
//!
//! The `max` keeps a late chunk from being scheduled in the past (audible
//! glitch) and an early chunk from overlapping its predecessor.
//!
//! ## Ordering precondition
//!
//! Chunks must be enqueued in playback order. The scheduler does not sequence
//! or reorder them; the live API delivers in order over a single channel.
//!
//! ## Ownership
//!
//! One scheduler per output context and per session. All mutation goes
//! through `&mut self`, so the owning thread is the single writer.

use std::sync::Arc;

use tracing::debug;

use crate::{
    audio::output::{OutputContext, SourceHandle},
    buffering::chunk::PlayableBuffer,
    codec::PcmCodec,
    error::Result,
};

/// Where a chunk landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledChunk {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

pub struct PlaybackScheduler {
    output: Arc<dyn OutputContext>,
    codec: PcmCodec,
    /// Format of inbound chunks (24 kHz mono for the live API).
    sample_rate: u32,
    channels: u16,
    /// Output-clock time at which the next chunk should begin.
    next_start_time: f64,
    /// Scheduled sources that have not finished or been stopped.
    active: Vec<SourceHandle>,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn OutputContext>, codec: PcmCodec, sample_rate: u32, channels: u16) -> Self {
        Self {
            output,
            codec,
            sample_rate,
            channels,
            next_start_time: 0.0,
            active: Vec::new(),
        }
    }

    /// Decode a base64 chunk and schedule it right after the previous one.
    ///
    /// Returns `Ok(None)` when the chunk decodes to nothing; it is dropped
    /// without touching the cursor.
    ///
    /// # Errors
    /// Propagates output-context failures.
    pub fn enqueue_chunk(&mut self, chunk: &str) -> Result<Option<ScheduledChunk>> {
        match self.codec.decode_chunk(chunk, self.sample_rate, self.channels) {
            Some(buffer) => self.enqueue_buffer(buffer).map(Some),
            None => {
                debug!(chunk_len = chunk.len(), "dropping chunk with no playable audio");
                Ok(None)
            }
        }
    }

    /// Schedule an already-decoded buffer right after the previous one.
    pub fn enqueue_buffer(&mut self, buffer: PlayableBuffer) -> Result<ScheduledChunk> {
        self.reap_finished();

        let duration = buffer.duration_secs();
        let start_at = self.next_start_time.max(self.output.current_time());
        let handle = self.output.schedule(Arc::new(buffer), start_at)?;

        self.next_start_time = start_at + duration;
        self.active.push(handle);

        debug!(
            start_at,
            duration,
            in_flight = self.active.len(),
            "chunk scheduled"
        );
        Ok(ScheduledChunk { start_at, duration })
    }

    /// Barge-in: stop everything in flight and rewind the cursor.
    ///
    /// Idempotent; stopping a source that already ended is a no-op.
    /// Returns how many sources were still in flight.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        for handle in self.active.drain(..) {
            handle.stop();
        }
        self.next_start_time = 0.0;
        if stopped > 0 {
            debug!(stopped, "playback interrupted");
        }
        stopped
    }

    /// Drop sources that finished naturally. Returns how many were removed.
    pub fn reap_finished(&mut self) -> usize {
        let before = self.active.len();
        self.active.retain(|h| !h.has_ended());
        before - self.active.len()
    }

    /// Sources still scheduled or playing.
    pub fn in_flight(&mut self) -> usize {
        self.reap_finished();
        self.active.len()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn output(&self) -> &Arc<dyn OutputContext> {
        &self.output
    }

    pub fn codec(&self) -> &PcmCodec {
        &self.codec
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.interrupt();
    }
}
