//! # mnemonix-core
//!
//! Audio core of the MnemoniX vocabulary tutor.
//!
//! ## Architecture
//!
//! ```text
//! Narration:  text ─► SpeechSynthesizer ─► base64 ─► PcmCodec ─► NarrationPlayer ─► OutputContext
//!
//! Live:       Microphone → MicCapture → SPSC ring → pipeline(spawn_blocking)
//!                                                     │  16 kHz frames, base64
//!                                                     ▼
//!                                               LiveTransport ◄──► Gemini Live
//!                                                     │  24 kHz chunks, transcripts
//!                                                     ▼
//!                                   PlaybackScheduler ─► OutputContext (timeline)
//! ```
//!
//! Output contexts are injected: every playback stream gets its own clock, and
//! tests drive a `VirtualOutput` instead of a device.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod api;
pub mod audio;
pub mod buffering;
pub mod codec;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod live;
pub mod narration;

// Convenience re-exports for downstream crates
pub use api::{Language, SpeechSynthesizer};
pub use audio::output::{OutputContext, SourceHandle, VirtualOutput};
pub use buffering::chunk::PlayableBuffer;
pub use codec::PcmCodec;
pub use engine::{LiveSession, PlaybackScheduler, SessionConfig};
pub use error::{MnemonixError, Result};
pub use ipc::events::{PlaybackEvent, SessionStatus, SessionStatusEvent, Speaker, TranscriptEvent};
pub use narration::{MnemonicEntry, NarrationConfig, NarrationPlayer, PayloadSource, PlayOutcome};

#[cfg(feature = "audio-cpal")]
pub use audio::output::CpalOutput;

#[cfg(feature = "live-ws")]
pub use live::GeminiLiveTransport;
