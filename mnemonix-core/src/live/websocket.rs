//! Gemini Live over a native-tls websocket (feature `live-ws`).
//!
//! Blocking I/O on purpose: the pipeline already runs on its own thread and
//! polls the socket with a short read timeout between microphone frames.

use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use native_tls::TlsStream;
use tracing::{debug, info, warn};
use tungstenite::{Message, WebSocket};

use super::{ClientMessage, LiveTransport, ServerMessage};
use crate::error::{MnemonixError, Result};

const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound on waiting for `setupComplete`.
const SETUP_TIMEOUT: Duration = Duration::from_secs(30);
/// Read timeout once the session is live; bounds each `try_recv` poll.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

type Socket = WebSocket<TlsStream<TcpStream>>;

pub struct GeminiLiveTransport {
    socket: Socket,
    closed: bool,
}

impl GeminiLiveTransport {
    /// Connect, send `setup` and wait for the server to acknowledge it.
    ///
    /// # Errors
    /// `MnemonixError::Transport` on network, TLS or handshake failure, on a
    /// server error during setup, or when setup is not acknowledged in time.
    pub fn connect(api_key: &str, setup: &ClientMessage) -> Result<Self> {
        let ws_url = format!("{LIVE_ENDPOINT}?key={api_key}");
        let mut socket = open_socket(&ws_url)?;

        socket
            .send(Message::Text(setup.to_json()?.into()))
            .map_err(transport_err)?;
        set_read_timeout(&mut socket, POLL_TIMEOUT)?;

        let started = Instant::now();
        loop {
            match read_message(&mut socket)? {
                Some(msg) if msg.is_setup_complete() => break,
                Some(msg) => {
                    if let Some(err) = msg.error {
                        let _ = socket.close(None);
                        return Err(MnemonixError::Transport(format!(
                            "setup rejected: {}",
                            err.message
                        )));
                    }
                }
                None => {
                    if started.elapsed() > SETUP_TIMEOUT {
                        let _ = socket.close(None);
                        return Err(MnemonixError::Transport("setup timeout".into()));
                    }
                }
            }
        }

        info!(setup_ms = started.elapsed().as_millis() as u64, "live session ready");
        Ok(Self {
            socket,
            closed: false,
        })
    }
}

impl LiveTransport for GeminiLiveTransport {
    fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = message.to_json()?;
        self.socket.write(Message::Text(json.into())).map_err(transport_err)?;
        self.socket.flush().map_err(transport_err)
    }

    fn try_recv(&mut self) -> Result<Option<ServerMessage>> {
        read_message(&mut self.socket)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
        debug!("live session closed");
    }
}

impl Drop for GeminiLiveTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_socket(ws_url: &str) -> Result<Socket> {
    let url = url::Url::parse(ws_url).map_err(|e| MnemonixError::Transport(e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| MnemonixError::Transport("no host in live endpoint".into()))?;
    let port = url.port_or_known_default().unwrap_or(443);

    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| MnemonixError::Transport(format!("failed to resolve {host}")))?;

    let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    tcp.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    tcp.set_write_timeout(Some(HANDSHAKE_TIMEOUT))?;
    tcp.set_nodelay(true)?;

    let connector =
        native_tls::TlsConnector::new().map_err(|e| MnemonixError::Transport(e.to_string()))?;
    let tls = connector
        .connect(host, tcp)
        .map_err(|e| MnemonixError::Transport(format!("tls: {e}")))?;

    let (socket, _response) = tungstenite::client::client(ws_url, tls)
        .map_err(|e| MnemonixError::Transport(format!("websocket handshake: {e}")))?;
    Ok(socket)
}

fn set_read_timeout(socket: &mut Socket, timeout: Duration) -> Result<()> {
    socket.get_mut().get_mut().set_read_timeout(Some(timeout))?;
    Ok(())
}

/// One read with the socket's timeout. `Ok(None)` on timeout or control frames.
fn read_message(socket: &mut Socket) -> Result<Option<ServerMessage>> {
    let text = match socket.read() {
        Ok(Message::Text(text)) => text.to_string(),
        // The live API frames JSON as binary messages too.
        Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
            Ok(text) => text,
            Err(_) => {
                warn!(len = data.len(), "ignoring non-utf8 binary frame");
                return Ok(None);
            }
        },
        Ok(Message::Close(frame)) => {
            let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
            return Err(MnemonixError::Transport(format!(
                "live session closed by server: {reason}"
            )));
        }
        Ok(_) => return Ok(None),
        Err(tungstenite::Error::Io(ref e))
            if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
        {
            return Ok(None)
        }
        Err(e) => return Err(transport_err(e)),
    };

    match ServerMessage::parse(&text) {
        Ok(msg) => Ok(Some(msg)),
        Err(e) => {
            warn!("ignoring unparseable live message: {e}");
            Ok(None)
        }
    }
}

fn transport_err(e: tungstenite::Error) -> MnemonixError {
    MnemonixError::Transport(e.to_string())
}
