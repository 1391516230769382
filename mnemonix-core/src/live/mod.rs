//! Live bidirectional tutoring transport.
//!
//! The session pipeline talks to the model through [`LiveTransport`] so the
//! websocket can be swapped for a scripted transport in tests.

pub mod protocol;

#[cfg(feature = "live-ws")]
pub mod websocket;

#[cfg(feature = "live-ws")]
pub use websocket::GeminiLiveTransport;

pub use protocol::{ClientMessage, ServerMessage};

use crate::error::Result;

/// A connected, already set-up live session.
///
/// Owned by the pipeline thread, hence `Send` but not `Sync`.
pub trait LiveTransport: Send {
    /// Send one message.
    ///
    /// # Errors
    /// `MnemonixError::Transport` when the connection is gone.
    fn send(&mut self, message: &ClientMessage) -> Result<()>;

    /// Poll for one inbound message without blocking for long.
    ///
    /// `Ok(None)` means nothing arrived yet. An error means the session is
    /// over (closed by the server or broken).
    fn try_recv(&mut self) -> Result<Option<ServerMessage>>;

    /// Close the session. Safe to call more than once.
    fn close(&mut self);
}

impl<T: LiveTransport + ?Sized> LiveTransport for Box<T> {
    fn send(&mut self, message: &ClientMessage) -> Result<()> {
        (**self).send(message)
    }

    fn try_recv(&mut self) -> Result<Option<ServerMessage>> {
        (**self).try_recv()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
