//! Sample-accurate mixing timeline shared by every output context.
//!
//! Voices are placed at an absolute frame on the output clock. `render`
//! mixes whatever overlaps the requested block, advances the clock and
//! retires voices whose last frame has been rendered (or that were stopped).

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::buffering::chunk::PlayableBuffer;

#[derive(Debug)]
struct VoiceState {
    id: u64,
    start_at: f64,
    duration: f64,
    stopped: AtomicBool,
    ended: AtomicBool,
}

/// Handle to one buffer scheduled on an output context.
///
/// Cloning shares the same underlying voice.
#[derive(Debug, Clone)]
pub struct SourceHandle(Arc<VoiceState>);

impl SourceHandle {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Output-clock time (seconds) at which playback begins.
    pub fn start_at(&self) -> f64 {
        self.0.start_at
    }

    pub fn duration(&self) -> f64 {
        self.0.duration
    }

    /// Stop playback. Stopping an ended or already-stopped source is a no-op.
    pub fn stop(&self) {
        self.0.stopped.store(true, Ordering::Release);
    }

    /// True once the source finished naturally or was stopped.
    pub fn has_ended(&self) -> bool {
        self.0.ended.load(Ordering::Acquire) || self.0.stopped.load(Ordering::Acquire)
    }

    fn is_stopped(&self) -> bool {
        self.0.stopped.load(Ordering::Acquire)
    }

    fn mark_ended(&self) {
        self.0.ended.store(true, Ordering::Release);
    }
}

struct Voice {
    handle: SourceHandle,
    start_frame: u64,
    buffer: Arc<PlayableBuffer>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.buffer.frame_count() as u64
    }
}

/// Mixer state behind every [`super::OutputContext`].
pub struct Timeline {
    sample_rate: u32,
    channels: u16,
    frames_rendered: u64,
    voices: Vec<Voice>,
    next_id: u64,
}

impl Timeline {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            frames_rendered: 0,
            voices: Vec::new(),
            next_id: 0,
        }
    }

    /// Adopt the format the device actually opened with. Only valid before
    /// anything has been scheduled or rendered.
    pub(crate) fn reconfigure(&mut self, sample_rate: u32, channels: u16) {
        debug_assert!(self.voices.is_empty() && self.frames_rendered == 0);
        self.sample_rate = sample_rate.max(1);
        self.channels = channels.max(1);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Seconds of audio rendered so far.
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    /// Voices scheduled and not yet retired.
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Place `buffer` at `start_at` seconds. A start in the past begins at
    /// the current clock position. `buffer` must already be at the timeline rate.
    pub fn add_voice(&mut self, buffer: Arc<PlayableBuffer>, start_at: f64) -> SourceHandle {
        let requested = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        let start_frame = requested.max(self.frames_rendered);

        let id = self.next_id;
        self.next_id += 1;

        let handle = SourceHandle(Arc::new(VoiceState {
            id,
            start_at: start_frame as f64 / self.sample_rate as f64,
            duration: buffer.frame_count() as f64 / self.sample_rate as f64,
            stopped: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        }));

        if buffer.is_empty() {
            handle.mark_ended();
        } else {
            self.voices.push(Voice {
                handle: handle.clone(),
                start_frame,
                buffer,
            });
        }
        handle
    }

    /// Mix the next `out.len() / channels` frames into `out` (interleaved).
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let ch = self.channels as usize;
        let frames = out.len() / ch;
        let block_start = self.frames_rendered;
        let block_end = block_start + frames as u64;

        for voice in &self.voices {
            if voice.handle.is_stopped() {
                continue;
            }
            let from = block_start.max(voice.start_frame);
            let to = block_end.min(voice.end_frame());
            if from >= to {
                continue;
            }
            let last_src_channel = voice.buffer.channel_count().saturating_sub(1);
            for abs in from..to {
                let src = (abs - voice.start_frame) as usize;
                let dst = (abs - block_start) as usize * ch;
                for c in 0..ch {
                    out[dst + c] += voice.buffer.channel(c.min(last_src_channel))[src];
                }
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.frames_rendered = block_end;
        self.voices.retain(|voice| {
            let done = voice.handle.is_stopped() || block_end >= voice.end_frame();
            if done {
                voice.handle.mark_ended();
            }
            !done
        });
    }
}
