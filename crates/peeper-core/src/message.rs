//! Wire message shapes.
//!
//! A text frame carries either a structured JSON record or a legacy
//! free-text detection line. Receivers try the structured shape first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::parser::DetectionParser;
use crate::policy::{CUP, PERSON};
use crate::signal::Signal;
use crate::snapshot::{DetectionSnapshot, ObjectStats};

/// Per-priority-label values kept for older receivers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetPair<T> {
    /// Value for `person`.
    pub person: T,
    /// Value for `cup`.
    pub cup: T,
}

/// Structured detection record.
///
/// `alert`, `average_confidence` and `all_objects` are required; everything
/// else is optional on decode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// Alert rule fired on the sender.
    pub alert: bool,
    /// Mean confidence across every detected object.
    pub average_confidence: f64,
    /// Full snapshot.
    pub all_objects: DetectionSnapshot,
    /// Counts for the two priority labels.
    #[serde(default)]
    pub target_detection: TargetPair<u32>,
    /// Confidences for the two priority labels.
    #[serde(default)]
    pub target_confidence: TargetPair<f64>,
    /// Value the sender computed, informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Label behind the sender's value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_object: Option<String>,
    /// When the sender computed the signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl DetectionRecord {
    /// Record describing `snapshot` and the signal computed from it.
    pub fn new(snapshot: &DetectionSnapshot, signal: &Signal) -> Self {
        Self {
            alert: signal.alert_active,
            average_confidence: snapshot.mean_confidence(),
            all_objects: snapshot.clone(),
            target_detection: TargetPair {
                person: snapshot.count(PERSON),
                cup: snapshot.count(CUP),
            },
            target_confidence: TargetPair {
                person: snapshot.confidence(PERSON),
                cup: snapshot.confidence(CUP),
            },
            value: Some(signal.value),
            primary_object: signal.primary_object.clone(),
            timestamp: Some(signal.timestamp),
        }
    }

    /// `all_objects`, or a snapshot rebuilt from the target fields when the
    /// sender left it empty.
    pub fn effective_objects(&self) -> DetectionSnapshot {
        if !self.all_objects.is_empty() {
            return self.all_objects.clone();
        }
        let mut snapshot = DetectionSnapshot::new();
        for (label, count, confidence) in [
            (PERSON, self.target_detection.person, self.target_confidence.person),
            (CUP, self.target_detection.cup, self.target_confidence.cup),
        ] {
            if count > 0 {
                snapshot.insert(label, ObjectStats { count, confidence });
            }
        }
        snapshot
    }
}

/// A decoded text frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// JSON detection record.
    Structured(DetectionRecord),
    /// Free-text detection line.
    Legacy(String),
}

impl Message {
    /// Decode a text frame: structured record first, then a legacy line the
    /// parser recognizes. Anything else is a [`CoreError::DecodeFailure`].
    pub fn decode(text: &str, parser: &DetectionParser) -> Result<Self> {
        match serde_json::from_str::<DetectionRecord>(text) {
            Ok(record) => Ok(Self::Structured(record)),
            Err(err) => {
                tracing::trace!(error = %err, "not a structured record, trying legacy");
                if parser.is_detection_line(text) {
                    Ok(Self::Legacy(text.to_string()))
                } else {
                    Err(CoreError::DecodeFailure(preview(text)))
                }
            }
        }
    }

    /// Text frame payload.
    pub fn encode(&self) -> Result<String> {
        match self {
            Self::Structured(record) => Ok(serde_json::to_string(record)?),
            Self::Legacy(text) => Ok(text.clone()),
        }
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 64;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SignalPolicy;
    use peeper_settings::DetectionSettings;

    fn parser() -> DetectionParser {
        DetectionParser::from_settings(&DetectionSettings::default()).unwrap()
    }

    #[test]
    fn structured_record_decodes() {
        let text = r#"{
            "alert": true,
            "average_confidence": 0.7,
            "all_objects": {"person": {"count": 1, "confidence": 0.8},
                            "cup": {"count": 1, "confidence": 0.6}},
            "target_detection": {"person": 1, "cup": 1},
            "target_confidence": {"person": 0.8, "cup": 0.6}
        }"#;
        let Message::Structured(record) = Message::decode(text, &parser()).unwrap() else {
            panic!("expected structured");
        };
        assert!(record.alert);
        assert_eq!(record.all_objects.count("cup"), 1);
        assert!(record.timestamp.is_none());
    }

    #[test]
    fn plain_text_falls_back_to_legacy() {
        let msg = Message::decode("Object detected: person (0.92)", &parser()).unwrap();
        assert_eq!(msg, Message::Legacy("Object detected: person (0.92)".into()));
    }

    #[test]
    fn json_without_required_fields_is_legacy_or_failure() {
        let p = parser();
        assert!(matches!(
            Message::decode(r#"{"object": "person"}"#, &p).unwrap(),
            Message::Legacy(_)
        ));
        let err = Message::decode(r#"{"hello": 1}"#, &p).unwrap_err();
        assert!(matches!(err, CoreError::DecodeFailure(_)));
    }

    #[test]
    fn unrecognized_text_fails() {
        let err = Message::decode("Signal", &parser()).unwrap_err();
        assert_eq!(err.error_kind(), "decode_failure");
    }

    #[test]
    fn encoded_record_decodes_to_same_signal() {
        let p = parser();
        let policy = SignalPolicy::default();
        let snapshot = p.parse("person (0.80) cup (0.60)");
        let signal = policy.evaluate(&snapshot);
        let wire = Message::Structured(DetectionRecord::new(&snapshot, &signal))
            .encode()
            .unwrap();

        let decoded = Message::decode(&wire, &p).unwrap();
        let received = policy.evaluate_message(&decoded, &p);
        assert_eq!(received.alert_active, signal.alert_active);
        assert!((received.value - signal.value).abs() < 1e-9);
    }

    #[test]
    fn non_alert_record_uses_receiver_scales() {
        let text = r#"{"alert": false, "average_confidence": 0.5,
                       "all_objects": {"cup": {"count": 1, "confidence": 0.5}}}"#;
        let p = parser();
        let msg = Message::decode(text, &p).unwrap();
        let s = SignalPolicy::new(0.7, 1.0, 0.1, Vec::new()).evaluate_message(&msg, &p);
        assert!(!s.alert_active);
        assert!((s.value - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_all_objects_uses_target_fields() {
        let text = r#"{"alert": false, "average_confidence": 0.0, "all_objects": {},
                       "target_detection": {"person": 1, "cup": 0},
                       "target_confidence": {"person": 0.5, "cup": 0.0}}"#;
        let p = parser();
        let msg = Message::decode(text, &p).unwrap();
        let s = SignalPolicy::default().evaluate_message(&msg, &p);
        assert!((s.value - 0.5 * 0.7).abs() < 1e-9);
    }

    #[test]
    fn long_undecodable_text_is_truncated_in_error() {
        let text = "x".repeat(500);
        let CoreError::DecodeFailure(shown) = Message::decode(&text, &parser()).unwrap_err() else {
            panic!("expected decode failure");
        };
        assert!(shown.chars().count() <= 65);
    }
}
