//! `LiveSession`: lifecycle controller for spoken tutoring.
//!
//! ## Lifecycle
//!
//! ```text
//! LiveSession::new()
//!     └─► start()   → status = Connecting; mic opened, transport connected
//!                     on the worker; status = Listening
//!         └─► stop() → running=false, playback interrupted, transport
//!                     closed, mic dropped, status = Stopped
//! ```
//!
//! Every `start()` hands its worker a fresh run flag and waits for the
//! previous worker to exit, so at most one loop owns a transport.
//!
//! `start()`/`stop()` in the wrong state return `AlreadyRunning`/`NotRunning`
//! rather than panicking. A transport or device failure moves the session to
//! `Error`; it is never restarted automatically.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS, so `MicCapture` is created
//! *inside* the `spawn_blocking` closure and dropped there. A sync oneshot
//! reports device/connect failures back to the `start()` caller.

pub mod pipeline;
pub mod scheduler;

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    api::{Language, DEFAULT_VOICE},
    audio::{output::OutputContext, MicCapture},
    buffering::create_capture_ring,
    codec::PcmCodec,
    error::{MnemonixError, Result},
    ipc::events::{PlaybackEvent, SessionStatus, SessionStatusEvent, TranscriptEvent},
    live::{protocol::LIVE_MODEL, ClientMessage, LiveTransport},
};

pub use pipeline::{DiagnosticsSnapshot, SessionCommand};
pub use scheduler::{PlaybackScheduler, ScheduledChunk};

/// Broadcast channel capacity for slow subscribers.
const BROADCAST_CAP: usize = 256;

/// How long a restart waits for the previous loop to close its transport.
const WORKER_EXIT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rate of outbound microphone frames (Hz). Default: 16000.
    pub input_sample_rate: u32,
    /// Samples per outbound frame. Default: 4096.
    pub frame_samples: usize,
    /// Rate of inbound tutor audio (Hz). Default: 24000.
    pub output_sample_rate: u32,
    pub output_channels: u16,
    /// Transcript lines kept for `recent_transcripts`. Default: 5.
    pub transcript_history: usize,
    pub model: String,
    pub voice: String,
    /// Language the tutor speaks.
    pub language: Language,
    /// Open the microphone. Disable for text-only sessions.
    pub capture_enabled: bool,
    /// `None` uses the default input device.
    pub preferred_input_device: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            frame_samples: 4096,
            output_sample_rate: 24_000,
            output_channels: 1,
            transcript_history: 5,
            model: LIVE_MODEL.into(),
            voice: DEFAULT_VOICE.into(),
            language: Language::default(),
            capture_enabled: true,
            preferred_input_device: None,
        }
    }
}

impl SessionConfig {
    /// First message of every live session.
    pub fn setup_message(&self) -> ClientMessage {
        ClientMessage::tutor_setup(&self.model, &self.voice, self.language)
    }
}

/// Opens the live transport, given the setup message to send.
pub type Connector = Box<dyn FnOnce(&ClientMessage) -> Result<Box<dyn LiveTransport>> + Send>;

/// The top-level live session handle.
///
/// `Send + Sync`: wrap in `Arc<LiveSession>` to share it with event
/// forwarding tasks.
pub struct LiveSession {
    config: SessionConfig,
    /// Run flag of the current worker. Each `start()` gets a fresh one so a
    /// previous loop can never be revived by a restart.
    running: Mutex<Option<Arc<AtomicBool>>>,
    /// Disconnects when the previous worker has closed its transport.
    worker_done: Mutex<Option<Receiver<()>>>,
    status: Arc<Mutex<SessionStatus>>,
    transcript_tx: broadcast::Sender<TranscriptEvent>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    playback_tx: broadcast::Sender<PlaybackEvent>,
    seq: Arc<AtomicU64>,
    recent: Arc<Mutex<VecDeque<String>>>,
    diagnostics: Arc<pipeline::SessionDiagnostics>,
    commands: Mutex<Option<Sender<SessionCommand>>>,
}

impl LiveSession {
    pub fn new(config: SessionConfig) -> Self {
        let (transcript_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (playback_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config,
            running: Mutex::new(None),
            worker_done: Mutex::new(None),
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
            transcript_tx,
            status_tx,
            playback_tx,
            seq: Arc::new(AtomicU64::new(0)),
            recent: Arc::new(Mutex::new(VecDeque::new())),
            diagnostics: Arc::new(pipeline::SessionDiagnostics::default()),
            commands: Mutex::new(None),
        }
    }

    /// Open the microphone, connect, and start the session loop.
    ///
    /// Blocks until the previous worker (if any) has shut down, then until
    /// the microphone is open and the transport is set up (or either
    /// failed). Must be called inside a Tokio runtime. `output` should be
    /// owned by this session alone.
    ///
    /// # Errors
    /// - `AlreadyRunning` if already started.
    /// - `NoDefaultInputDevice` / `AudioStream` on microphone failure.
    /// - `Transport` / `Upstream` when the live API cannot be reached.
    pub fn start(&self, connect: Connector, output: Arc<dyn OutputContext>) -> Result<()> {
        let running = {
            let mut slot = self.running.lock();
            if slot.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                return Err(MnemonixError::AlreadyRunning);
            }
            let flag = Arc::new(AtomicBool::new(true));
            *slot = Some(Arc::clone(&flag));
            flag
        };
        self.wait_for_previous_worker();

        self.diagnostics.reset();
        self.recent.lock().clear();
        self.set_status(SessionStatus::Connecting, None);

        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        *self.commands.lock() = Some(command_tx);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        *self.worker_done.lock() = Some(done_rx);

        let config = self.config.clone();
        let worker_running = Arc::clone(&running);
        let transcript_tx = self.transcript_tx.clone();
        let status_tx = self.status_tx.clone();
        let playback_tx = self.playback_tx.clone();
        let status = Arc::clone(&self.status);
        let seq = Arc::clone(&self.seq);
        let recent = Arc::clone(&self.recent);
        let diagnostics = Arc::clone(&self.diagnostics);

        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        tokio::task::spawn_blocking(move || {
            // Dropped on every exit path; `start()` waits on it before reuse.
            let _done = done_tx;
            let running = worker_running;

            // ── Microphone (must live on THIS thread — cpal::Stream is !Send) ──
            let (capture, consumer) = if config.capture_enabled {
                let (producer, consumer) = create_capture_ring();
                match MicCapture::open_with_preference(
                    producer,
                    Arc::new(AtomicBool::new(true)),
                    config.preferred_input_device.as_deref(),
                ) {
                    Ok(c) => (Some(c), Some(consumer)),
                    Err(e) => {
                        running.store(false, Ordering::SeqCst);
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                }
            } else {
                (None, None)
            };
            let capture_sample_rate = capture
                .as_ref()
                .map(|c| c.sample_rate)
                .unwrap_or(config.input_sample_rate);

            // ── Live transport ────────────────────────────────────────────
            let transport = match connect(&config.setup_message()) {
                Ok(t) => t,
                Err(e) => {
                    running.store(false, Ordering::SeqCst);
                    let _ = open_tx.send(Err(e));
                    return;
                }
            };
            let _ = open_tx.send(Ok(capture_sample_rate));

            let codec = PcmCodec::with_diagnostics(Arc::clone(&diagnostics.codec));
            let scheduler = scheduler::PlaybackScheduler::new(
                output,
                codec,
                config.output_sample_rate,
                config.output_channels,
            );

            pipeline::run(pipeline::SessionContext {
                config,
                transport,
                scheduler,
                consumer,
                capture_sample_rate,
                running,
                commands: command_rx,
                transcript_tx,
                status_tx,
                playback_tx,
                status,
                seq,
                recent,
                diagnostics,
            });

            if let Some(capture) = capture {
                capture.stop();
            }
        });

        match open_rx.recv() {
            Ok(Ok(rate)) => {
                // The loop may already have failed and published `Error`.
                if running.load(Ordering::SeqCst) {
                    self.set_status(SessionStatus::Listening, None);
                }
                info!(capture_rate = rate, "live session started");
                Ok(())
            }
            Ok(Err(e)) => {
                running.store(false, Ordering::SeqCst);
                self.commands.lock().take();
                self.set_status(SessionStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                self.commands.lock().take();
                self.set_status(SessionStatus::Error, Some("session failed to start".into()));
                Err(MnemonixError::Other(anyhow::anyhow!(
                    "session worker died unexpectedly"
                )))
            }
        }
    }

    /// Stop the session. The loop interrupts playback and closes the
    /// transport on its way out.
    ///
    /// # Errors
    /// `NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        match self.running.lock().take() {
            Some(flag) if flag.load(Ordering::SeqCst) => flag.store(false, Ordering::SeqCst),
            _ => return Err(MnemonixError::NotRunning),
        }

        self.commands.lock().take();
        self.set_status(SessionStatus::Stopped, None);
        info!("live session stop requested");
        Ok(())
    }

    /// Send a typed user turn.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.command(SessionCommand::SendText(text.into()))
    }

    /// Cut off tutor playback now.
    pub fn interrupt(&self) -> Result<()> {
        self.command(SessionCommand::Interrupt)
    }

    fn command(&self, cmd: SessionCommand) -> Result<()> {
        if !self.is_running() {
            return Err(MnemonixError::NotRunning);
        }
        match self.commands.lock().as_ref() {
            Some(tx) => tx.send(cmd).map_err(|_| MnemonixError::NotRunning),
            None => Err(MnemonixError::NotRunning),
        }
    }

    /// Block until the previous worker has released its transport and output.
    fn wait_for_previous_worker(&self) {
        let Some(done) = self.worker_done.lock().take() else {
            return;
        };
        if let Err(RecvTimeoutError::Timeout) = done.recv_timeout(WORKER_EXIT_TIMEOUT) {
            warn!(
                timeout_ms = WORKER_EXIT_TIMEOUT.as_millis() as u64,
                "previous live session worker still running"
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    /// Last few transcript lines, oldest first (`"You: ..."`, `"Tutor: ..."`).
    pub fn recent_transcripts(&self) -> Vec<String> {
        self.recent.lock().iter().cloned().collect()
    }

    pub fn subscribe_transcripts(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.transcript_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_playback(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.playback_tx.subscribe()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn set_status(&self, new_status: SessionStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(SessionStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if let Some(flag) = self.running.lock().take() {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_live_audio_formats() {
        let config = SessionConfig::default();
        assert_eq!(config.input_sample_rate, 16_000);
        assert_eq!(config.frame_samples, 4096);
        assert_eq!(config.output_sample_rate, 24_000);
        assert_eq!(config.transcript_history, 5);
        assert_eq!(config.voice, "Kore");
    }

    #[test]
    fn idle_session_rejects_stop_and_commands() {
        let session = LiveSession::new(SessionConfig::default());
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(matches!(session.stop(), Err(MnemonixError::NotRunning)));
        assert!(matches!(
            session.send_text("hello"),
            Err(MnemonixError::NotRunning)
        ));
        assert!(matches!(session.interrupt(), Err(MnemonixError::NotRunning)));
    }
}
