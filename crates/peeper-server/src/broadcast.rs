//! Latest-signal fan-out.
//!
//! Ingest publishes into a `watch` slot; every registered peer gets its own
//! send loop that wakes on the configured cadence and pushes whatever is
//! latest. A stalled peer only stalls its own loop, and only until the send
//! timeout. The registry keeps weak references for enumeration; the send
//! loop holds the only strong one it needs and removes its peer on the
//! first failed or timed-out send.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use metrics::counter;
use parking_lot::RwLock;
use peeper_core::{DetectionRecord, DetectionSnapshot, Message, Signal};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{BROADCAST_SENDS_TOTAL, BROADCAST_SEND_FAILURES_TOTAL};
use crate::peer::{Peer, PeerId};

/// Send timeout used unless [`Broadcaster::with_send_timeout`] overrides it.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// The most recent signal and its encoded wire payload.
#[derive(Debug)]
pub struct Latest {
    /// Snapshot the signal came from.
    pub snapshot: DetectionSnapshot,
    /// Computed signal.
    pub signal: Signal,
    /// Text frame payload sent to peers.
    pub payload: Arc<str>,
}

impl Latest {
    fn new(snapshot: DetectionSnapshot, signal: Signal) -> Option<Self> {
        let record = DetectionRecord::new(&snapshot, &signal);
        match Message::Structured(record).encode() {
            Ok(text) => Some(Self {
                snapshot,
                signal,
                payload: Arc::from(text),
            }),
            Err(err) => {
                warn!(error = %err, "failed to encode detection record");
                None
            }
        }
    }

    fn idle() -> Self {
        let signal = Signal::idle();
        // An empty snapshot always encodes; fall back to a literal anyway.
        Self::new(DetectionSnapshot::new(), signal.clone()).unwrap_or_else(|| Self {
            snapshot: DetectionSnapshot::new(),
            signal,
            payload: Arc::from(r#"{"alert":false,"average_confidence":0.0,"all_objects":{}}"#),
        })
    }
}

struct PeerEntry {
    peer: Weak<dyn Peer>,
    cancel: CancellationToken,
    generation: u64,
}

/// Registry of connected peers plus the latest signal they are fed.
pub struct Broadcaster {
    latest: watch::Sender<Arc<Latest>>,
    peers: RwLock<HashMap<PeerId, PeerEntry>>,
    next_generation: AtomicU64,
    interval: Duration,
    send_timeout: Duration,
}

impl Broadcaster {
    /// Broadcaster whose send loops push every `interval`.
    pub fn new(interval: Duration) -> Self {
        let (latest, _) = watch::channel(Arc::new(Latest::idle()));
        Self {
            latest,
            peers: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            interval,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Drop a peer whose single send takes longer than `timeout`.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Replace the latest signal. Never waits on peers.
    pub fn publish(&self, snapshot: DetectionSnapshot, signal: Signal) {
        if let Some(latest) = Latest::new(snapshot, signal) {
            let _ = self.latest.send_replace(Arc::new(latest));
        }
    }

    /// Current latest signal.
    pub fn latest(&self) -> Arc<Latest> {
        self.latest.borrow().clone()
    }

    /// Add a peer and spawn its send loop.
    ///
    /// The loop stops when `parent` is cancelled, when the peer is
    /// unregistered, or after its first failed send. Registering an id that
    /// is already present replaces the old entry and stops its loop.
    pub fn register(self: &Arc<Self>, peer: Arc<dyn Peer>, parent: &CancellationToken) {
        let id = peer.id().clone();
        let cancel = parent.child_token();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self.peers.write().insert(
            id.clone(),
            PeerEntry {
                peer: Arc::downgrade(&peer),
                cancel: cancel.clone(),
                generation,
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        debug!(peer_id = %id, peers = self.peer_count(), "peer registered");

        let this = Arc::clone(self);
        drop(tokio::spawn(async move {
            this.send_loop(peer, cancel, generation).await;
        }));
    }

    /// Remove a peer and stop its send loop. Unknown ids are ignored.
    pub fn unregister(&self, id: &PeerId) {
        let removed = self.peers.write().remove(id);
        if let Some(entry) = removed {
            entry.cancel.cancel();
            debug!(peer_id = %id, "peer unregistered");
        }
    }

    /// Whether `id` is registered and still alive.
    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers
            .read()
            .get(id)
            .is_some_and(|e| e.peer.strong_count() > 0)
    }

    /// Number of live registered peers.
    pub fn peer_count(&self) -> usize {
        self.peers
            .read()
            .values()
            .filter(|e| e.peer.strong_count() > 0)
            .count()
    }

    /// Ids of live registered peers.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers
            .read()
            .values()
            .filter_map(|e| e.peer.upgrade().map(|p| p.id().clone()))
            .collect()
    }

    async fn send_loop(&self, peer: Arc<dyn Peer>, cancel: CancellationToken, generation: u64) {
        let id = peer.id().clone();
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let payload = self.latest.borrow().payload.clone();
            let sent = tokio::select! {
                () = cancel.cancelled() => break,
                sent = time::timeout(self.send_timeout, peer.send_text(&payload)) => sent,
            };
            match sent {
                Ok(Ok(())) => counter!(BROADCAST_SENDS_TOTAL).increment(1),
                Ok(Err(err)) => {
                    counter!(BROADCAST_SEND_FAILURES_TOTAL).increment(1);
                    info!(peer_id = %id, error = %err, kind = err.error_kind(), "send failed, removing peer");
                    break;
                }
                Err(_) => {
                    counter!(BROADCAST_SEND_FAILURES_TOTAL).increment(1);
                    info!(
                        peer_id = %id,
                        timeout_ms = self.send_timeout.as_millis() as u64,
                        "send timed out, removing peer"
                    );
                    break;
                }
            }
        }

        self.remove_generation(&id, generation);
    }

    /// Remove `id` only if it still belongs to the loop that registered
    /// `generation`; a replacement entry under the same id is left alone.
    fn remove_generation(&self, id: &PeerId, generation: u64) {
        let mut peers = self.peers.write();
        if peers.get(id).is_some_and(|e| e.generation == generation) {
            if let Some(entry) = peers.remove(id) {
                entry.cancel.cancel();
            }
            debug!(peer_id = %id, "peer unregistered");
        }
    }
}
