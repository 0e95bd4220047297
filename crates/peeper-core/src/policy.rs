//! Priority rules from snapshot to signal.
//!
//! | Rule | Condition | Value |
//! |------|-----------|-------|
//! | 1 | exactly one `person` and one `cup` | mean confidence of all objects, alert |
//! | 2 | `person` present | `confidence(person) * person_scale` |
//! | 3 | `cup` present | `confidence(cup) * cup_scale` |
//! | 4 | first interesting object present | `confidence(label) * other_scale` |
//! | 5 | otherwise | `0.0` |

use chrono::Utc;
use peeper_settings::DetectionSettings;

use crate::message::{DetectionRecord, Message};
use crate::parser::DetectionParser;
use crate::signal::Signal;
use crate::snapshot::DetectionSnapshot;

/// Highest-priority label.
pub const PERSON: &str = "person";
/// Second-priority label.
pub const CUP: &str = "cup";

/// Clamp into [0.0, 1.0]; NaN becomes `0.0`.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// Deterministic snapshot → [`Signal`] mapping.
#[derive(Clone, Debug)]
pub struct SignalPolicy {
    person_scale: f64,
    cup_scale: f64,
    other_scale: f64,
    interesting: Vec<String>,
}

impl SignalPolicy {
    /// Policy with explicit scales and interesting-object order.
    pub fn new(person_scale: f64, cup_scale: f64, other_scale: f64, interesting: Vec<String>) -> Self {
        Self {
            person_scale,
            cup_scale,
            other_scale,
            interesting,
        }
    }

    /// Policy from the detection settings section.
    pub fn from_settings(settings: &DetectionSettings) -> Self {
        Self::new(
            settings.person_scale,
            settings.cup_scale,
            settings.other_scale,
            settings.interesting_objects.clone(),
        )
    }

    /// Apply every rule, alert included.
    pub fn evaluate(&self, snapshot: &DetectionSnapshot) -> Signal {
        if snapshot.count(PERSON) == 1 && snapshot.count(CUP) == 1 {
            return signal(true, snapshot.mean_confidence(), Some(PERSON));
        }
        self.evaluate_scaled(snapshot)
    }

    /// Signal for a structured record.
    ///
    /// The sender's `alert` flag is trusted and its `average_confidence`
    /// becomes the value; otherwise rules 2–5 run over `all_objects` (or the
    /// legacy target fields when `all_objects` is empty).
    pub fn evaluate_record(&self, record: &DetectionRecord) -> Signal {
        if record.alert {
            return signal(true, record.average_confidence, Some(PERSON));
        }
        self.evaluate_scaled(&record.effective_objects())
    }

    /// Signal for either wire shape; legacy text goes through `parser`.
    pub fn evaluate_message(&self, message: &Message, parser: &DetectionParser) -> Signal {
        match message {
            Message::Structured(record) => self.evaluate_record(record),
            Message::Legacy(text) => self.evaluate(&parser.parse(text)),
        }
    }

    /// Rules 2–5.
    fn evaluate_scaled(&self, snapshot: &DetectionSnapshot) -> Signal {
        if snapshot.contains(PERSON) {
            return signal(false, snapshot.confidence(PERSON) * self.person_scale, Some(PERSON));
        }
        if snapshot.contains(CUP) {
            return signal(false, snapshot.confidence(CUP) * self.cup_scale, Some(CUP));
        }
        if let Some(label) = self.interesting.iter().find(|l| snapshot.contains(l)) {
            let value = snapshot.confidence(label) * self.other_scale;
            return signal(false, value, Some(label.as_str()));
        }
        signal(false, 0.0, None)
    }
}

impl Default for SignalPolicy {
    fn default() -> Self {
        Self::from_settings(&DetectionSettings::default())
    }
}

fn signal(alert_active: bool, value: f64, primary: Option<&str>) -> Signal {
    Signal {
        alert_active,
        value: clamp_unit(value),
        primary_object: primary.map(str::to_string),
        timestamp: Utc::now(),
    }
}
