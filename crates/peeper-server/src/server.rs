//! TCP accept loop and per-peer lifecycle.
//!
//! Each accepted socket gets its own task:
//! 1. Upgrade handshake, bounded by `handshakeTimeoutMs`
//! 2. Register with the [`Broadcaster`] (spawns the send loop)
//! 3. Receive loop and idle-ping monitor race until either ends
//! 4. Unregister, close, log

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use metrics::counter;
use peeper_settings::ServerSettings;
use peeper_ws::{Connection, ConnectionConfig, KeepaliveResult, WsError, run_keepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::broadcast::Broadcaster;
use crate::error::{Result, ServerError};
use crate::metrics::{CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL, HANDSHAKE_FAILURES_TOTAL};
use crate::peer::{PeerConnection, PeerId};

/// A running accept loop.
pub struct ServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the accept loop to finish (after cancellation).
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            warn!(error = %err, "accept loop panicked");
        }
    }
}

/// Bind the listening socket and spawn the accept loop.
///
/// Failing to bind is the one process-fatal server error.
pub async fn bind(
    settings: &ServerSettings,
    broadcaster: Arc<Broadcaster>,
    cancel: CancellationToken,
) -> Result<ServerHandle> {
    let addr = bind_addr(settings)?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "listening");

    let settings = Arc::new(settings.clone());
    let task = tokio::spawn(accept_loop(listener, settings, broadcaster, cancel));
    Ok(ServerHandle { local_addr, task })
}

/// Listening address from settings. `host` must be an IP literal (v4 or
/// v6, without brackets).
fn bind_addr(settings: &ServerSettings) -> Result<SocketAddr> {
    let ip: IpAddr = settings
        .host
        .parse()
        .map_err(|_| ServerError::InvalidAddress(settings.host.clone()))?;
    Ok(SocketAddr::new(ip, settings.port))
}

async fn accept_loop(
    listener: TcpListener,
    settings: Arc<ServerSettings>,
    broadcaster: Arc<Broadcaster>,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, addr)) => {
                let _ = stream.set_nodelay(true);
                drop(tokio::spawn(handle_peer(
                    stream,
                    addr,
                    Arc::clone(&settings),
                    Arc::clone(&broadcaster),
                    cancel.child_token(),
                )));
            }
            Err(err) => warn!(error = %err, "accept failed"),
        }
    }
    info!("accept loop stopped");
}

#[instrument(skip_all, fields(%addr))]
async fn handle_peer(
    stream: TcpStream,
    addr: SocketAddr,
    settings: Arc<ServerSettings>,
    broadcaster: Arc<Broadcaster>,
    cancel: CancellationToken,
) {
    let config = ConnectionConfig {
        max_payload: settings.max_payload_bytes,
        verify_accept: true,
        write_timeout: settings.write_timeout(),
    };
    let (connection, request) =
        match time::timeout(settings.handshake_timeout(), Connection::accept(stream, &config)).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(err)) => {
                counter!(HANDSHAKE_FAILURES_TOTAL).increment(1);
                warn!(error = %err, kind = err.error_kind(), "handshake failed");
                return;
            }
            Err(_) => {
                counter!(HANDSHAKE_FAILURES_TOTAL).increment(1);
                warn!("handshake timed out");
                return;
            }
        };

    let id = PeerId::new();
    let connection = Arc::new(connection);
    counter!(CONNECTIONS_OPENED_TOTAL).increment(1);
    info!(peer_id = %id, path = %request.path, "peer connected");

    broadcaster.register(
        Arc::new(PeerConnection::new(id.clone(), Arc::clone(&connection))),
        &cancel,
    );

    let reason = tokio::select! {
        reason = receive_loop(&connection, &id) => reason,
        result = run_keepalive(
            Arc::clone(&connection),
            settings.idle_ping(),
            settings.pong_grace(),
            cancel.clone(),
        ) => match result {
            KeepaliveResult::PeerUnresponsive => "unresponsive",
            KeepaliveResult::Closed => "closed",
            KeepaliveResult::Cancelled => "shutdown",
        },
    };

    cancel.cancel();
    broadcaster.unregister(&id);
    connection.close().await;
    counter!(CONNECTIONS_CLOSED_TOTAL).increment(1);
    info!(peer_id = %id, reason, "peer disconnected");
}

/// Drain incoming frames so pings are answered and closure is observed.
async fn receive_loop<S>(connection: &Connection<S>, id: &PeerId) -> &'static str
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send,
{
    loop {
        match connection.receive_text().await {
            Ok(Some(text)) => debug!(peer_id = %id, len = text.len(), "message from peer ignored"),
            Ok(None) => {}
            Err(WsError::ConnectionClosed) => return "peer closed",
            Err(err) => {
                debug!(peer_id = %id, error = %err, "receive failed");
                return err.error_kind();
            }
        }
    }
}
