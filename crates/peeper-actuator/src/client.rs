//! Reconnecting signal consumer.
//!
//! `connect → consume → (closed) → wait reconnectDelay → connect ...` forever,
//! with a fixed delay and no escalation beyond logging. Every arriving frame
//! is decoded, turned into a signal, and applied in receipt order.

use std::sync::Arc;

use metrics::counter;
use peeper_core::{DetectionParser, Message, SignalPolicy};
use peeper_settings::ClientSettings;
use peeper_ws::{ClientRequest, Connection, ConnectionConfig, KeepaliveResult, WsError, run_keepalive};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::ActuatorController;
use crate::metrics::{CONNECT_ATTEMPTS_TOTAL, DECODE_FAILURES_TOTAL};

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The server closed the connection (close frame or EOF).
    Closed,
    /// The server stopped answering pings.
    Unresponsive,
    /// Shutdown was requested.
    Cancelled,
    /// Protocol or transport failure.
    Failed(WsError),
}

/// Connects to the server and feeds every signal to a controller.
pub struct ActuatorClient {
    settings: ClientSettings,
    parser: DetectionParser,
    policy: SignalPolicy,
}

impl ActuatorClient {
    /// Client for `settings`, decoding legacy text with `parser` and
    /// scoring with `policy`.
    pub fn new(settings: ClientSettings, parser: DetectionParser, policy: SignalPolicy) -> Self {
        Self {
            settings,
            parser,
            policy,
        }
    }

    /// Open a TCP connection and run the client handshake.
    ///
    /// Both steps together are bounded by `handshakeTimeoutMs`; a server
    /// that accepts but never answers yields [`WsError::Timeout`]. On a
    /// rejected handshake the socket is already shut down.
    pub async fn connect_once(&self) -> peeper_ws::Result<Connection<TcpStream>> {
        let host = self.settings.server_host.as_str();
        let port = self.settings.server_port;
        counter!(CONNECT_ATTEMPTS_TOTAL).increment(1);

        let request = ClientRequest {
            host,
            port,
            path: &self.settings.path,
        };
        let config = ConnectionConfig {
            max_payload: self.settings.max_payload_bytes,
            verify_accept: self.settings.verify_accept,
            write_timeout: self.settings.write_timeout(),
        };
        let connect = async {
            let stream = TcpStream::connect((host, port)).await?;
            let _ = stream.set_nodelay(true);
            Connection::connect(stream, &request, &config).await
        };
        time::timeout(self.settings.handshake_timeout(), connect)
            .await
            .unwrap_or(Err(WsError::Timeout("handshake")))
    }

    /// Connect, consume, and reconnect until `cancel` fires.
    pub async fn run(&self, controller: &mut ActuatorController, cancel: CancellationToken) {
        let delay = self.settings.reconnect_delay();
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let attempt = tokio::select! {
                () = cancel.cancelled() => break,
                attempt = self.connect_once() => attempt,
            };
            match attempt {
                Ok(connection) => {
                    info!(
                        host = %self.settings.server_host,
                        port = self.settings.server_port,
                        "connected"
                    );
                    let end = self.run_session(Arc::new(connection), controller, &cancel).await;
                    match end {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Failed(err) => {
                            warn!(error = %err, kind = err.error_kind(), "connection failed");
                        }
                        other => info!(reason = ?other, "connection ended"),
                    }
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        kind = err.error_kind(),
                        host = %self.settings.server_host,
                        "connect failed"
                    );
                }
            }

            debug!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = time::sleep(delay) => {}
            }
        }
        info!("client stopped");
    }

    /// Consume one open connection until it ends.
    ///
    /// The receive loop and the idle-ping monitor race; whichever ends first
    /// ends the session and the connection is closed.
    pub async fn run_session<S>(
        &self,
        connection: Arc<Connection<S>>,
        controller: &mut ActuatorController,
        cancel: &CancellationToken,
    ) -> SessionEnd
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let monitor_cancel = cancel.child_token();
        let end = tokio::select! {
            end = self.receive_loop(&connection, controller) => end,
            result = run_keepalive(
                Arc::clone(&connection),
                self.settings.idle_ping(),
                self.settings.pong_grace(),
                monitor_cancel.clone(),
            ) => match result {
                KeepaliveResult::PeerUnresponsive => SessionEnd::Unresponsive,
                KeepaliveResult::Closed => SessionEnd::Closed,
                KeepaliveResult::Cancelled => SessionEnd::Cancelled,
            },
        };
        monitor_cancel.cancel();
        connection.close().await;
        end
    }

    async fn receive_loop<S>(
        &self,
        connection: &Connection<S>,
        controller: &mut ActuatorController,
    ) -> SessionEnd
    where
        S: AsyncRead + AsyncWrite + Send,
    {
        loop {
            let text = match connection.receive_text().await {
                Ok(Some(text)) => text,
                Ok(None) => continue,
                Err(WsError::ConnectionClosed | WsError::IncompleteRead) => return SessionEnd::Closed,
                Err(err) => return SessionEnd::Failed(err),
            };

            match Message::decode(&text, &self.parser) {
                Ok(message) => {
                    let signal = self.policy.evaluate_message(&message, &self.parser);
                    let _ = controller.apply(&signal);
                }
                Err(err) => {
                    counter!(DECODE_FAILURES_TOTAL).increment(1);
                    warn!(error = %err, "dropping undecodable message");
                }
            }
        }
    }
}
