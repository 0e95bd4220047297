//! Detection-line recognizer.
//!
//! The vision process prints free text such as
//! `Object detected: person (0.92)` or `person (confidence: 0.85) cup (0.60)`.
//! Each tracked label is matched case-insensitively on word boundaries; a
//! parenthesized number right after a label (optionally prefixed with
//! `confidence:`) is that occurrence's confidence.

use peeper_settings::DetectionSettings;
use regex::Regex;

use crate::error::{CoreError, Result};
use crate::policy::{CUP, PERSON};
use crate::snapshot::{DetectionSnapshot, ObjectStats};

/// Separator characters allowed between a label and its `(`.
const SEPARATORS: &str = r"[\s:=\-]*";
/// `(0.85)`, `( .5 )`, `(confidence: 0.85)`, `(confidence=1)`.
const CONFIDENCE: &str = r"\(\s*(?:confidence\s*[:=]?\s*)?(\d+(?:\.\d+)?|\.\d+)\s*\)";

#[derive(Debug)]
struct LabelMatcher {
    label: String,
    occurrence: Regex,
    confidence: Regex,
}

impl LabelMatcher {
    fn new(label: String) -> Result<Self> {
        let word = format!(r"(?i)\b{}\b", regex::escape(&label));
        let occurrence = Regex::new(&word).map_err(|source| CoreError::InvalidLabel {
            label: label.clone(),
            source,
        })?;
        let confidence = Regex::new(&format!("{word}{SEPARATORS}{CONFIDENCE}")).map_err(
            |source| CoreError::InvalidLabel {
                label: label.clone(),
                source,
            },
        )?;
        Ok(Self {
            label,
            occurrence,
            confidence,
        })
    }

    fn stats(&self, line: &str) -> Option<ObjectStats> {
        let count = self.occurrence.find_iter(line).count();
        if count == 0 {
            return None;
        }
        let values: Vec<f64> = self
            .confidence
            .captures_iter(line)
            .filter_map(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
            .collect();
        let confidence = if values.is_empty() {
            0.0
        } else {
            (values.iter().sum::<f64>() / values.len() as f64).clamp(0.0, 1.0)
        };
        Some(ObjectStats {
            count: u32::try_from(count).unwrap_or(u32::MAX),
            confidence,
        })
    }
}

/// Turns raw vision-process lines into [`DetectionSnapshot`]s.
#[derive(Debug)]
pub struct DetectionParser {
    matchers: Vec<LabelMatcher>,
    /// Lowercased substrings that mark a detection line.
    needles: Vec<String>,
}

impl DetectionParser {
    /// Build a parser tracking `labels` (duplicates ignored) and recognizing
    /// lines that contain any label or any of `markers`.
    pub fn new<L, M>(labels: L, markers: M) -> Result<Self>
    where
        L: IntoIterator,
        L::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        let mut matchers: Vec<LabelMatcher> = Vec::new();
        for label in labels {
            let label: String = label.into();
            if label.trim().is_empty() || matchers.iter().any(|m| m.label == label) {
                continue;
            }
            matchers.push(LabelMatcher::new(label)?);
        }

        let mut needles: Vec<String> = matchers.iter().map(|m| m.label.to_lowercase()).collect();
        needles.extend(
            markers
                .into_iter()
                .map(|m| m.into().to_lowercase())
                .filter(|m| !m.is_empty()),
        );

        Ok(Self { matchers, needles })
    }

    /// Parser for `person`, `cup`, and the configured interesting objects.
    pub fn from_settings(settings: &DetectionSettings) -> Result<Self> {
        let labels = [PERSON.to_string(), CUP.to_string()]
            .into_iter()
            .chain(settings.interesting_objects.iter().cloned());
        Self::new(labels, settings.markers.iter().cloned())
    }

    /// Tracked labels in priority order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.matchers.iter().map(|m| m.label.as_str())
    }

    /// Whether the line mentions any tracked label or marker.
    pub fn is_detection_line(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        self.needles.iter().any(|n| lower.contains(n.as_str()))
    }

    /// Build a snapshot of every tracked label on the line.
    ///
    /// Unknown labels are ignored; a line with nothing tracked yields an
    /// empty snapshot.
    pub fn parse(&self, line: &str) -> DetectionSnapshot {
        self.matchers
            .iter()
            .filter_map(|m| m.stats(line).map(|s| (m.label.clone(), s)))
            .collect()
    }
}
