//! Blocking live-session loop.
//!
//! ## Stages (per iteration)
//!
//! ```text
//! 1. Drain control commands (typed text, manual interrupt)
//! 2. Drain microphone ring → resample to 16 kHz → accumulate
//!    → every `frame_samples` samples: encode + send one realtime frame
//! 3. Poll the transport; per inbound message, in order:
//!    a. transcriptions (tutor, then learner) → TranscriptEvent + recent log
//!    b. audio parts → PlaybackScheduler::enqueue_chunk
//!    c. `interrupted` → PlaybackScheduler::interrupt
//! 4. Idle? sleep briefly
//! ```
//!
//! The loop owns the scheduler, so cursor and in-flight set have exactly one
//! writer. Transport or output failures end the session with status `Error`;
//! there is no automatic reconnect.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, OnceLock,
};
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    audio::resample::RateConverter,
    buffering::{AudioConsumer, Consumer},
    codec::{CodecDiagnostics, CodecSnapshot},
    engine::{scheduler::PlaybackScheduler, SessionConfig},
    error::{MnemonixError, Result},
    ipc::events::{
        PlaybackEvent, SessionStatus, SessionStatusEvent, Speaker, TranscriptEvent,
    },
    live::{ClientMessage, LiveTransport, ServerMessage},
};

#[derive(Default)]
pub struct SessionDiagnostics {
    /// Raw microphone samples drained from the ring.
    pub samples_captured: AtomicUsize,
    pub frames_sent: AtomicUsize,
    pub messages_received: AtomicUsize,
    pub chunks_received: AtomicUsize,
    pub chunks_scheduled: AtomicUsize,
    /// Inbound chunks that decoded to nothing.
    pub chunks_dropped: AtomicUsize,
    pub interruptions: AtomicUsize,
    pub transcripts: AtomicUsize,
    /// Shared with the scheduler's codec.
    pub codec: Arc<CodecDiagnostics>,
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        self.samples_captured.store(0, Ordering::Relaxed);
        self.frames_sent.store(0, Ordering::Relaxed);
        self.messages_received.store(0, Ordering::Relaxed);
        self.chunks_received.store(0, Ordering::Relaxed);
        self.chunks_scheduled.store(0, Ordering::Relaxed);
        self.chunks_dropped.store(0, Ordering::Relaxed);
        self.interruptions.store(0, Ordering::Relaxed);
        self.transcripts.store(0, Ordering::Relaxed);
        self.codec.reset();
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_captured: self.samples_captured.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            transcripts: self.transcripts.load(Ordering::Relaxed),
            codec: self.codec.snapshot(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub samples_captured: usize,
    pub frames_sent: usize,
    pub messages_received: usize,
    pub chunks_received: usize,
    pub chunks_scheduled: usize,
    pub chunks_dropped: usize,
    pub interruptions: usize,
    pub transcripts: usize,
    pub codec: CodecSnapshot,
}

/// Requests from the session handle to the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Send a typed user turn.
    SendText(String),
    /// Cut off tutor playback locally.
    Interrupt,
}

/// Everything the loop needs, passed as one struct so the closure stays tidy.
pub struct SessionContext {
    pub config: SessionConfig,
    pub transport: Box<dyn LiveTransport>,
    pub scheduler: PlaybackScheduler,
    /// `None` when the session runs without a microphone (text only).
    pub consumer: Option<AudioConsumer>,
    pub capture_sample_rate: u32,
    pub running: Arc<AtomicBool>,
    pub commands: Receiver<SessionCommand>,
    pub transcript_tx: broadcast::Sender<TranscriptEvent>,
    pub status_tx: broadcast::Sender<SessionStatusEvent>,
    pub playback_tx: broadcast::Sender<PlaybackEvent>,
    pub status: Arc<Mutex<SessionStatus>>,
    pub seq: Arc<AtomicU64>,
    /// Last `config.transcript_history` transcript lines.
    pub recent: Arc<Mutex<VecDeque<String>>>,
    pub diagnostics: Arc<SessionDiagnostics>,
}

/// Raw samples drained from the ring per iteration (20 ms at 48 kHz).
const DRAIN_CHUNK: usize = 960;

/// Inbound messages handled per iteration before capture is serviced again.
const MAX_MESSAGES_PER_TICK: usize = 16;

const DEFAULT_IDLE_SLEEP_MS: u64 = 5;

/// Run the loop until `ctx.running` becomes false or the session fails.
pub fn run(mut ctx: SessionContext) {
    info!(
        capture = ctx.consumer.is_some(),
        capture_rate = ctx.capture_sample_rate,
        "live session loop started"
    );

    let mut resampler = match RateConverter::new(
        ctx.capture_sample_rate,
        ctx.config.input_sample_rate,
        DRAIN_CHUNK,
    ) {
        Ok(r) => r,
        Err(e) => {
            fail(&ctx, &e);
            finish(&mut ctx);
            return;
        }
    };

    if !resampler.is_passthrough() {
        info!(
            "resampling capture from={} to={}",
            ctx.capture_sample_rate, ctx.config.input_sample_rate
        );
    }

    let codec = ctx.scheduler.codec().clone();
    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut pending: Vec<f32> = Vec::with_capacity(ctx.config.frame_samples * 2);

    while ctx.running.load(Ordering::Relaxed) {
        let mut busy = false;

        // ── 1. Control commands ───────────────────────────────────────────
        loop {
            match ctx.commands.try_recv() {
                Ok(cmd) => {
                    busy = true;
                    if let Err(e) = handle_command(&mut ctx, cmd) {
                        fail(&ctx, &e);
                        break;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        // ── 2. Microphone → frames ────────────────────────────────────────
        if let Some(consumer) = ctx.consumer.as_mut() {
            let n = consumer.pop_slice(&mut raw);
            if n > 0 {
                busy = true;
                ctx.diagnostics
                    .samples_captured
                    .fetch_add(n, Ordering::Relaxed);
                pending.extend_from_slice(&resampler.process(&raw[..n]));
            }
        }

        while pending.len() >= ctx.config.frame_samples {
            let frame: Vec<f32> = pending.drain(..ctx.config.frame_samples).collect();
            let data = codec.float_samples_to_base64_pcm(&frame);
            if let Err(e) = ctx.transport.send(&ClientMessage::audio_frame(data)) {
                fail(&ctx, &e);
                break;
            }
            ctx.diagnostics.frames_sent.fetch_add(1, Ordering::Relaxed);
        }

        // ── 3. Inbound messages ───────────────────────────────────────────
        for _ in 0..MAX_MESSAGES_PER_TICK {
            if !ctx.running.load(Ordering::Relaxed) {
                break;
            }
            match ctx.transport.try_recv() {
                Ok(Some(msg)) => {
                    busy = true;
                    if let Err(e) = handle_server_message(&mut ctx, &msg) {
                        fail(&ctx, &e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    fail(&ctx, &e);
                    break;
                }
            }
        }

        if !busy {
            std::thread::sleep(Duration::from_millis(idle_sleep_ms()));
        }
    }

    finish(&mut ctx);
}

/// Apply one inbound message: transcripts, then audio, then interruption.
///
/// # Errors
/// A server-reported error, or an output context that refuses a buffer.
pub fn handle_server_message(ctx: &mut SessionContext, msg: &ServerMessage) -> Result<()> {
    ctx.diagnostics
        .messages_received
        .fetch_add(1, Ordering::Relaxed);

    if let Some(err) = &msg.error {
        return Err(MnemonixError::Upstream {
            status: err
                .code
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or_default(),
            message: err.message.clone(),
            retryable: false,
        });
    }

    if let Some(text) = msg.output_text() {
        emit_transcript(ctx, Speaker::Tutor, text);
    }
    if let Some(text) = msg.input_text() {
        emit_transcript(ctx, Speaker::User, text);
    }

    for chunk in msg.audio_chunks() {
        ctx.diagnostics
            .chunks_received
            .fetch_add(1, Ordering::Relaxed);
        match ctx.scheduler.enqueue_chunk(chunk)? {
            Some(scheduled) => {
                ctx.diagnostics
                    .chunks_scheduled
                    .fetch_add(1, Ordering::Relaxed);
                let _ = ctx.playback_tx.send(PlaybackEvent::Scheduled {
                    start_at: scheduled.start_at,
                    duration: scheduled.duration,
                });
            }
            None => {
                ctx.diagnostics
                    .chunks_dropped
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    if msg.is_interrupted() {
        interrupt_playback(ctx);
    }

    if msg.is_turn_complete() {
        debug!(
            next_start = ctx.scheduler.next_start_time(),
            "tutor turn complete"
        );
    }

    Ok(())
}

fn handle_command(ctx: &mut SessionContext, cmd: SessionCommand) -> Result<()> {
    match cmd {
        SessionCommand::SendText(text) => {
            debug!(chars = text.len(), "sending typed turn");
            ctx.transport.send(&ClientMessage::user_text(text))
        }
        SessionCommand::Interrupt => {
            interrupt_playback(ctx);
            Ok(())
        }
    }
}

fn interrupt_playback(ctx: &mut SessionContext) {
    let stopped = ctx.scheduler.interrupt();
    ctx.diagnostics.interruptions.fetch_add(1, Ordering::Relaxed);
    let _ = ctx.playback_tx.send(PlaybackEvent::Interrupted { stopped });
}

fn emit_transcript(ctx: &mut SessionContext, speaker: Speaker, text: &str) {
    let event = TranscriptEvent {
        seq: ctx.seq.fetch_add(1, Ordering::Relaxed),
        speaker,
        text: text.to_string(),
    };

    {
        let mut recent = ctx.recent.lock();
        recent.push_back(event.display_line());
        while recent.len() > ctx.config.transcript_history {
            recent.pop_front();
        }
    }

    ctx.diagnostics.transcripts.fetch_add(1, Ordering::Relaxed);
    debug!(seq = event.seq, ?speaker, "transcript");
    let _ = ctx.transcript_tx.send(event);
}

/// Fatal: publish `Error` and make the loop exit.
fn fail(ctx: &SessionContext, err: &MnemonixError) {
    error!("live session failed: {err}");
    ctx.running.store(false, Ordering::SeqCst);
    *ctx.status.lock() = SessionStatus::Error;
    let _ = ctx.status_tx.send(SessionStatusEvent {
        status: SessionStatus::Error,
        detail: Some(err.to_string()),
    });
}

fn finish(ctx: &mut SessionContext) {
    let stopped = ctx.scheduler.interrupt();
    if stopped > 0 {
        let _ = ctx.playback_tx.send(PlaybackEvent::Interrupted { stopped });
    }
    ctx.transport.close();

    let snapshot = ctx.diagnostics.snapshot();
    info!(
        frames_sent = snapshot.frames_sent,
        chunks_scheduled = snapshot.chunks_scheduled,
        chunks_dropped = snapshot.chunks_dropped,
        interruptions = snapshot.interruptions,
        "live session loop exited"
    );
    if snapshot.codec.base64_failures > 0 || snapshot.codec.clamped_samples > 0 {
        warn!(
            base64_failures = snapshot.codec.base64_failures,
            clamped_samples = snapshot.codec.clamped_samples,
            "codec degraded some audio during the session"
        );
    }
}

fn idle_sleep_ms() -> u64 {
    static IDLE_SLEEP_MS: OnceLock<u64> = OnceLock::new();
    *IDLE_SLEEP_MS.get_or_init(|| {
        std::env::var("MNEMONIX_SESSION_IDLE_SLEEP_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_IDLE_SLEEP_MS)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::{OutputContext, VirtualOutput};
    use crate::buffering::{create_capture_ring, Producer};
    use crate::codec::{float_samples_to_base64_pcm, PcmCodec};
    use crate::live::protocol::{Blob, Content, Part, ServerContent, Transcription};

    struct SilentTransport {
        sent: Arc<Mutex<Vec<ClientMessage>>>,
    }

    impl LiveTransport for SilentTransport {
        fn send(&mut self, message: &ClientMessage) -> Result<()> {
            self.sent.lock().push(message.clone());
            Ok(())
        }

        fn try_recv(&mut self) -> Result<Option<ServerMessage>> {
            Ok(None)
        }

        fn close(&mut self) {}
    }

    fn context(output: Arc<VirtualOutput>) -> (SessionContext, Arc<Mutex<Vec<ClientMessage>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let diagnostics = Arc::new(SessionDiagnostics::default());
        let codec = PcmCodec::with_diagnostics(Arc::clone(&diagnostics.codec));
        let (_cmd_tx, commands) = crossbeam_channel::unbounded();
        let ctx = SessionContext {
            config: SessionConfig::default(),
            transport: Box::new(SilentTransport {
                sent: Arc::clone(&sent),
            }),
            scheduler: PlaybackScheduler::new(
                output as Arc<dyn OutputContext>,
                codec,
                24_000,
                1,
            ),
            consumer: None,
            capture_sample_rate: 16_000,
            running: Arc::new(AtomicBool::new(true)),
            commands,
            transcript_tx: broadcast::channel(16).0,
            status_tx: broadcast::channel(16).0,
            playback_tx: broadcast::channel(16).0,
            status: Arc::new(Mutex::new(SessionStatus::Listening)),
            seq: Arc::new(AtomicU64::new(0)),
            recent: Arc::new(Mutex::new(VecDeque::new())),
            diagnostics,
        };
        (ctx, sent)
    }

    fn audio_message(parts: Vec<&str>) -> ServerMessage {
        ServerMessage {
            server_content: Some(ServerContent {
                model_turn: Some(Content {
                    role: Some("model".into()),
                    parts: parts
                        .into_iter()
                        .map(|data| Part {
                            text: None,
                            inline_data: Some(Blob {
                                data: data.into(),
                                mime_type: "audio/pcm;rate=24000".into(),
                            }),
                        })
                        .collect(),
                }),
                ..ServerContent::default()
            }),
            ..ServerMessage::default()
        }
    }

    fn transcript_message(input: Option<&str>, output: Option<&str>) -> ServerMessage {
        ServerMessage {
            server_content: Some(ServerContent {
                input_transcription: input.map(|t| Transcription { text: t.into() }),
                output_transcription: output.map(|t| Transcription { text: t.into() }),
                ..ServerContent::default()
            }),
            ..ServerMessage::default()
        }
    }

    #[test]
    fn every_audio_part_is_scheduled_back_to_back() {
        let output = Arc::new(VirtualOutput::new(24_000));
        let (mut ctx, _) = context(Arc::clone(&output));
        let half = float_samples_to_base64_pcm(&vec![0.1; 12_000]);
        let tenth = float_samples_to_base64_pcm(&vec![0.1; 2_400]);

        handle_server_message(&mut ctx, &audio_message(vec![&half, "", &tenth])).unwrap();

        let snap = ctx.diagnostics.snapshot();
        assert_eq!(snap.chunks_received, 3);
        assert_eq!(snap.chunks_scheduled, 2);
        assert_eq!(snap.chunks_dropped, 1);
        assert!((ctx.scheduler.next_start_time() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn both_transcriptions_are_logged_and_history_is_bounded() {
        let output = Arc::new(VirtualOutput::new(24_000));
        let (mut ctx, _) = context(output);

        handle_server_message(&mut ctx, &transcript_message(Some("hi"), Some("salom"))).unwrap();
        {
            let recent = ctx.recent.lock();
            assert_eq!(recent[0], "Tutor: salom");
            assert_eq!(recent[1], "You: hi");
        }

        for i in 0..10 {
            let text = format!("line {i}");
            handle_server_message(&mut ctx, &transcript_message(None, Some(&text))).unwrap();
        }
        let recent = ctx.recent.lock();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent.back().map(String::as_str), Some("Tutor: line 9"));
    }

    #[test]
    fn server_error_is_fatal() {
        let output = Arc::new(VirtualOutput::new(24_000));
        let (mut ctx, _) = context(output);
        let msg = ServerMessage::parse(r#"{"error":{"code":403,"message":"denied"}}"#).unwrap();
        let err = handle_server_message(&mut ctx, &msg).unwrap_err();
        assert!(matches!(err, MnemonixError::Upstream { status: 403, .. }));
    }

    #[test]
    fn typed_text_becomes_a_client_content_turn() {
        let output = Arc::new(VirtualOutput::new(24_000));
        let (mut ctx, sent) = context(output);
        handle_command(&mut ctx, SessionCommand::SendText("what is olma?".into())).unwrap();
        assert_eq!(
            sent.lock().as_slice(),
            &[ClientMessage::user_text("what is olma?")]
        );
    }

    /// Counts every send and rejects all of them.
    struct BrokenTransport {
        attempts: Arc<AtomicUsize>,
    }

    impl LiveTransport for BrokenTransport {
        fn send(&mut self, _message: &ClientMessage) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(MnemonixError::Transport("connection reset".into()))
        }

        fn try_recv(&mut self) -> Result<Option<ServerMessage>> {
            Ok(None)
        }

        fn close(&mut self) {}
    }

    #[test]
    fn failed_command_stops_the_loop_before_capture_is_drained() {
        let output = Arc::new(VirtualOutput::new(24_000));
        let (mut ctx, _) = context(output);
        let attempts = Arc::new(AtomicUsize::new(0));
        ctx.transport = Box::new(BrokenTransport {
            attempts: Arc::clone(&attempts),
        });
        ctx.config.frame_samples = 256;

        let (mut producer, consumer) = create_capture_ring();
        producer.push_slice(&vec![0.1f32; 4_096]);
        ctx.consumer = Some(consumer);

        let (cmd_tx, commands) = crossbeam_channel::unbounded();
        cmd_tx.send(SessionCommand::SendText("hello".into())).unwrap();
        ctx.commands = commands;

        let status = Arc::clone(&ctx.status);
        let diagnostics = Arc::clone(&ctx.diagnostics);
        run(ctx);

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(*status.lock(), SessionStatus::Error);
        let snap = diagnostics.snapshot();
        assert_eq!(snap.samples_captured, 0);
        assert_eq!(snap.frames_sent, 0);
    }
}
