//! Metric names recorded through the `metrics` facade.
//!
//! No recorder is installed by this crate; without one every call is a no-op.

/// Peers that completed the handshake (counter).
pub const CONNECTIONS_OPENED_TOTAL: &str = "peeper_connections_opened_total";
/// Peers that disconnected for any reason (counter).
pub const CONNECTIONS_CLOSED_TOTAL: &str = "peeper_connections_closed_total";
/// Rejected or timed-out handshakes (counter).
pub const HANDSHAKE_FAILURES_TOTAL: &str = "peeper_handshake_failures_total";
/// Signal frames delivered by send loops (counter).
pub const BROADCAST_SENDS_TOTAL: &str = "peeper_broadcast_sends_total";
/// Send loop failures that removed a peer (counter).
pub const BROADCAST_SEND_FAILURES_TOTAL: &str = "peeper_broadcast_send_failures_total";
/// Detection lines turned into signals (counter).
pub const DETECTIONS_TOTAL: &str = "peeper_detections_total";
