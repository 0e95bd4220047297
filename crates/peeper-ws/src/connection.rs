//! A WebSocket connection over an exclusively-owned transport.
//!
//! State machine: `Connecting -> Open -> Closing -> Closed`. The handshake
//! runs inside [`Connection::accept`] / [`Connection::connect`], so callers
//! only ever hold an `Open` (or later) connection.
//!
//! All operations take `&self` so one `Arc<Connection>` can be shared by a
//! send loop and a receive loop; the read and write halves are locked
//! independently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::error::{Result, WsError};
use crate::frame::{Opcode, decode_frame, encode_frame};
use crate::handshake::{self, ClientRequest, UpgradeRequest};

/// Status code sent with a graceful close.
pub const CLOSE_NORMAL: u16 = 1000;
/// Status code sent when the peer broke the protocol.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// Which end of the connection this is. Decides masking in both directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Initiated the handshake; masks every outgoing frame.
    Client,
    /// Accepted the handshake; never masks, requires masked input.
    Server,
}

impl Role {
    fn masks_outgoing(self) -> bool {
        self == Self::Client
    }

    fn expects_masked_input(self) -> bool {
        self == Self::Server
    }
}

/// Lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Handshake done; text may flow.
    Open,
    /// A close frame was sent or received.
    Closing,
    /// Terminal.
    Closed,
}

/// Connection tuning.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Largest accepted frame payload.
    pub max_payload: usize,
    /// Client only: require a correct `Sec-WebSocket-Accept`.
    pub verify_accept: bool,
    /// Longest a single frame write (including waiting for the writer) may
    /// take. A peer that stops draining its socket is closed after this.
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_payload: 1 << 20,
            verify_accept: true,
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// An established WebSocket connection.
pub struct Connection<S> {
    role: Role,
    reader: tokio::sync::Mutex<BufReader<ReadHalf<S>>>,
    writer: tokio::sync::Mutex<WriteHalf<S>>,
    state: Mutex<ConnectionState>,
    last_activity: Mutex<Instant>,
    frames_received: AtomicU64,
    max_payload: usize,
    write_timeout: Duration,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Run the server handshake on `stream` and return the open connection.
    ///
    /// A rejected handshake closes the transport without a close frame.
    pub async fn accept(stream: S, config: &ConnectionConfig) -> Result<(Self, UpgradeRequest)> {
        let (read, mut write) = tokio::io::split(stream);
        let mut read = BufReader::new(read);
        trace!(state = ?ConnectionState::Connecting, role = ?Role::Server, "handshake started");
        let request = handshake::server_handshake(&mut read, &mut write).await?;
        Ok((Self::open(Role::Server, read, write, config), request))
    }

    /// Run the client handshake on `stream` and return the open connection.
    pub async fn connect(stream: S, request: &ClientRequest<'_>, config: &ConnectionConfig) -> Result<Self> {
        let (read, mut write) = tokio::io::split(stream);
        let mut read = BufReader::new(read);
        trace!(state = ?ConnectionState::Connecting, role = ?Role::Client, "handshake started");
        if let Err(err) =
            handshake::client_handshake(&mut read, &mut write, request, config.verify_accept).await
        {
            let _ = write.shutdown().await;
            return Err(err);
        }
        Ok(Self::open(Role::Client, read, write, config))
    }

    fn open(
        role: Role,
        reader: BufReader<ReadHalf<S>>,
        writer: WriteHalf<S>,
        config: &ConnectionConfig,
    ) -> Self {
        debug!(?role, "connection open");
        Self {
            role,
            reader: tokio::sync::Mutex::new(reader),
            writer: tokio::sync::Mutex::new(writer),
            state: Mutex::new(ConnectionState::Open),
            last_activity: Mutex::new(Instant::now()),
            frames_received: AtomicU64::new(0),
            max_payload: config.max_payload,
            write_timeout: config.write_timeout,
        }
    }

    /// This end's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether text can still be sent.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Time since the last frame of any kind arrived (or since open).
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Total frames received; used to detect traffic across an interval.
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Send one text message.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        if !self.is_open() {
            return Err(WsError::ConnectionClosed);
        }
        self.write_frame(Opcode::Text, text.as_bytes()).await
    }

    /// Send a ping with an empty payload.
    pub async fn ping(&self) -> Result<()> {
        if !self.is_open() {
            return Err(WsError::ConnectionClosed);
        }
        self.write_frame(Opcode::Ping, &[]).await
    }

    /// Read the next frame.
    ///
    /// Returns `Some(text)` for a text message and `None` after handling a
    /// control frame (a ping is answered with a pong before returning). A close
    /// frame is echoed and surfaces as [`WsError::ConnectionClosed`]. Any
    /// decode failure closes the connection.
    pub async fn receive_text(&self) -> Result<Option<String>> {
        if self.state() == ConnectionState::Closed {
            return Err(WsError::ConnectionClosed);
        }

        let decoded = {
            let mut reader = self.reader.lock().await;
            decode_frame(&mut *reader, self.max_payload).await
        };
        let frame = match decoded {
            Ok(frame) => frame,
            Err(err) => {
                debug!(error = %err, "frame read failed");
                if matches!(err, WsError::ProtocolViolation(_)) {
                    self.fail(CLOSE_PROTOCOL_ERROR).await;
                } else {
                    self.set_state(ConnectionState::Closed);
                }
                return Err(err);
            }
        };
        self.touch();

        if frame.masked != self.role.expects_masked_input() {
            let reason = if frame.masked {
                "server sent a masked frame"
            } else {
                "client sent an unmasked frame"
            };
            self.fail(CLOSE_PROTOCOL_ERROR).await;
            return Err(WsError::ProtocolViolation(reason.into()));
        }

        match frame.opcode {
            Opcode::Text => {
                if !frame.fin {
                    self.fail(CLOSE_PROTOCOL_ERROR).await;
                    return Err(WsError::ProtocolViolation("fragmented messages are not supported".into()));
                }
                match String::from_utf8(frame.payload) {
                    Ok(text) => Ok(Some(text)),
                    Err(_) => {
                        self.fail(CLOSE_PROTOCOL_ERROR).await;
                        Err(WsError::ProtocolViolation("text frame is not valid UTF-8".into()))
                    }
                }
            }
            Opcode::Ping => {
                trace!("ping received");
                if self.is_open() {
                    self.write_frame(Opcode::Pong, &frame.payload).await?;
                }
                Ok(None)
            }
            Opcode::Pong => {
                trace!("pong received");
                Ok(None)
            }
            Opcode::Close => {
                let was_open = self.transition(ConnectionState::Open, ConnectionState::Closing);
                debug!(echo = was_open, "close frame received");
                if was_open {
                    let code = match frame.payload.get(..2) {
                        Some(code) => code.to_vec(),
                        None => CLOSE_NORMAL.to_be_bytes().to_vec(),
                    };
                    let _ = self.write_frame(Opcode::Close, &code).await;
                }
                self.shutdown_transport().await;
                Err(WsError::ConnectionClosed)
            }
            Opcode::Binary | Opcode::Continuation => {
                self.fail(CLOSE_PROTOCOL_ERROR).await;
                Err(WsError::ProtocolViolation(format!("unsupported {:?} frame", frame.opcode)))
            }
        }
    }

    /// Close the connection with status 1000. Idempotent.
    pub async fn close(&self) {
        if self.transition(ConnectionState::Open, ConnectionState::Closing) {
            let _ = self.write_frame(Opcode::Close, &CLOSE_NORMAL.to_be_bytes()).await;
        }
        self.shutdown_transport().await;
    }

    /// Send a close frame with `code` (best effort) and drop to `Closed`.
    async fn fail(&self, code: u16) {
        if self.transition(ConnectionState::Open, ConnectionState::Closing) {
            let _ = self.write_frame(Opcode::Close, &code.to_be_bytes()).await;
        }
        self.shutdown_transport().await;
    }

    async fn shutdown_transport(&self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        let shutdown = async {
            let mut writer = self.writer.lock().await;
            writer.shutdown().await
        };
        if time::timeout(self.write_timeout, shutdown).await.is_err() {
            debug!(role = ?self.role, "transport shutdown timed out");
        }
        self.set_state(ConnectionState::Closed);
        debug!(role = ?self.role, "connection closed");
    }

    async fn write_frame(&self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        let bytes = encode_frame(opcode, payload, self.role.masks_outgoing());
        let written = time::timeout(self.write_timeout, async {
            let mut writer = self.writer.lock().await;
            writer.write_all(&bytes).await?;
            writer.flush().await
        })
        .await;
        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                debug!(error = %err, ?opcode, "write failed");
                self.set_state(ConnectionState::Closed);
                Err(WsError::ConnectionClosed)
            }
            // A partial frame may be on the wire; the stream is unusable.
            Err(_) => {
                debug!(?opcode, timeout_ms = self.write_timeout.as_millis() as u64, "write timed out");
                self.set_state(ConnectionState::Closed);
                Err(WsError::Timeout("write"))
            }
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
        let _ = self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.lock() = next;
    }

    /// Move `from -> to` atomically; false if the state was not `from`.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }
}
