//! Detection snapshot: what one line saw.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Count and mean confidence for one label.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectStats {
    /// Word-boundary occurrences on the line.
    pub count: u32,
    /// Mean of the parenthesized confidences, `0.0` when none were given.
    pub confidence: f64,
}

/// Label → stats for a single detection line.
///
/// Rebuilt wholesale per line; labels with zero occurrences are absent.
/// Serializes as a plain JSON object so it can be embedded as `all_objects`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionSnapshot {
    objects: BTreeMap<String, ObjectStats>,
}

impl DetectionSnapshot {
    /// Empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record stats for a label, replacing any previous entry.
    pub fn insert(&mut self, label: impl Into<String>, stats: ObjectStats) {
        let _ = self.objects.insert(label.into(), stats);
    }

    /// Stats for a label.
    pub fn get(&self, label: &str) -> Option<&ObjectStats> {
        self.objects.get(label)
    }

    /// Whether the label was seen at least once.
    pub fn contains(&self, label: &str) -> bool {
        self.objects.get(label).is_some_and(|s| s.count > 0)
    }

    /// Occurrence count, `0` when absent.
    pub fn count(&self, label: &str) -> u32 {
        self.objects.get(label).map_or(0, |s| s.count)
    }

    /// Confidence, `0.0` when absent.
    pub fn confidence(&self, label: &str) -> f64 {
        self.objects.get(label).map_or(0.0, |s| s.confidence)
    }

    /// Arithmetic mean of the confidence of every detected label.
    pub fn mean_confidence(&self) -> f64 {
        let present: Vec<f64> = self
            .objects
            .values()
            .filter(|s| s.count > 0)
            .map(|s| s.confidence)
            .collect();
        if present.is_empty() {
            0.0
        } else {
            present.iter().sum::<f64>() / present.len() as f64
        }
    }

    /// Whether nothing was detected.
    pub fn is_empty(&self) -> bool {
        !self.objects.values().any(|s| s.count > 0)
    }

    /// Number of labels present.
    pub fn len(&self) -> usize {
        self.objects.values().filter(|s| s.count > 0).count()
    }

    /// Iterate labels in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ObjectStats)> {
        self.objects.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, ObjectStats)> for DetectionSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, ObjectStats)>>(iter: I) -> Self {
        Self {
            objects: iter.into_iter().collect(),
        }
    }
}
