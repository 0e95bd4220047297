//! Peer identity and the send seam.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use peeper_ws::Connection;
use tokio::io::{AsyncRead, AsyncWrite};

/// Server-assigned peer identifier (`peer_<uuid v7>`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Fresh, time-ordered id.
    pub fn new() -> Self {
        Self(format!("peer_{}", uuid::Uuid::now_v7()))
    }

    /// Borrow as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Something the broadcaster can push text to.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Stable id for registry bookkeeping and logs.
    fn id(&self) -> &PeerId;

    /// Deliver one text message.
    async fn send_text(&self, text: &str) -> peeper_ws::Result<()>;
}

/// A server-side [`Connection`] tagged with its [`PeerId`].
pub struct PeerConnection<S> {
    id: PeerId,
    connection: Arc<Connection<S>>,
}

impl<S> PeerConnection<S> {
    /// Tag `connection` with `id`.
    pub fn new(id: PeerId, connection: Arc<Connection<S>>) -> Self {
        Self { id, connection }
    }
}

#[async_trait]
impl<S> Peer for PeerConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn id(&self) -> &PeerId {
        &self.id
    }

    async fn send_text(&self, text: &str) -> peeper_ws::Result<()> {
        self.connection.send_text(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_prefixed_and_unique() {
        let a = PeerId::new();
        let b = PeerId::new();
        assert!(a.as_str().starts_with("peer_"));
        assert_ne!(a, b);
    }

    #[test]
    fn display_matches_inner() {
        let id = PeerId::from("peer_fixed");
        assert_eq!(id.to_string(), "peer_fixed");
    }
}
