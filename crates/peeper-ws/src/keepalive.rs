//! Idle-ping liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::Connection;
use crate::error::WsError;

/// Outcome of the keepalive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveResult {
    /// A ping went unanswered (no traffic of any kind) for the grace period.
    PeerUnresponsive,
    /// The connection closed underneath the monitor.
    Closed,
    /// The monitor was cancelled externally.
    Cancelled,
}

/// Watch a connection for idleness.
///
/// Whenever no frame has arrived for `idle`, a ping is sent and the peer gets
/// `grace` to produce any traffic. The ping itself must also be written
/// within `grace`: a peer that has stopped draining its socket backs up
/// every writer, and counts as unresponsive. Frames are only counted while someone is
/// calling [`Connection::receive_text`], so this must run alongside a
/// receive loop.
pub async fn run_keepalive<S>(
    connection: Arc<Connection<S>>,
    idle: Duration,
    grace: Duration,
    cancel: CancellationToken,
) -> KeepaliveResult
where
    S: AsyncRead + AsyncWrite + Send,
{
    loop {
        let idle_for = connection.idle_for();
        if idle_for < idle {
            tokio::select! {
                () = time::sleep(idle - idle_for) => continue,
                () = cancel.cancelled() => return KeepaliveResult::Cancelled,
            }
        }

        debug!(idle_ms = idle_for.as_millis() as u64, "connection idle, sending ping");
        let seen = connection.frames_received();
        let pinged = tokio::select! {
            pinged = time::timeout(grace, connection.ping()) => pinged,
            () = cancel.cancelled() => return KeepaliveResult::Cancelled,
        };
        match pinged {
            Ok(Ok(())) => {}
            Ok(Err(WsError::Timeout(_))) | Err(_) => {
                debug!(grace_ms = grace.as_millis() as u64, "ping could not be written");
                return KeepaliveResult::PeerUnresponsive;
            }
            Ok(Err(_)) => return KeepaliveResult::Closed,
        }

        tokio::select! {
            () = time::sleep(grace) => {}
            () = cancel.cancelled() => return KeepaliveResult::Cancelled,
        }

        if connection.frames_received() == seen {
            debug!(grace_ms = grace.as_millis() as u64, "no traffic after ping");
            return KeepaliveResult::PeerUnresponsive;
        }
    }
}
