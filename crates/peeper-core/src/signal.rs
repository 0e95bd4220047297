//! The actuation signal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Actuation value and alert flag derived from one snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    /// Both priority objects seen exactly once.
    pub alert_active: bool,
    /// Target output level, always within [0.0, 1.0].
    pub value: f64,
    /// Label whose rule produced `value`.
    pub primary_object: Option<String>,
    /// When the signal was computed.
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    /// The "nothing detected" signal.
    pub fn idle() -> Self {
        Self {
            alert_active: false,
            value: 0.0,
            primary_object: None,
            timestamp: Utc::now(),
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::idle()
    }
}
