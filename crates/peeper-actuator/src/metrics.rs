//! Metric names recorded through the `metrics` facade.

/// Connection attempts, successful or not (counter).
pub const CONNECT_ATTEMPTS_TOTAL: &str = "peeper_actuator_connect_attempts_total";
/// Frames that matched neither message shape (counter).
pub const DECODE_FAILURES_TOTAL: &str = "peeper_actuator_decode_failures_total";
/// Sound tasks started (counter).
pub const SOUNDS_STARTED_TOTAL: &str = "peeper_actuator_sounds_started_total";
