use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::dedup::{derive_entry_id, fingerprint_image_ref};
use crate::error::{BenchmarkError, CoreResult};

pub const MANIFEST_VERSION: u32 = 1;

/// Axis-aligned box in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Checks `0 <= x1 < x2 <= 1` and `0 <= y1 < y2 <= 1`.
    pub fn is_normalized(&self) -> bool {
        let coords = [self.x1, self.y1, self.x2, self.y2];
        if coords.iter().any(|value| !value.is_finite()) {
            return false;
        }
        (0.0..=1.0).contains(&self.x1)
            && (0.0..=1.0).contains(&self.y1)
            && self.x1 < self.x2
            && self.x2 <= 1.0
            && self.y1 < self.y2
            && self.y2 <= 1.0
    }

    pub fn area(&self) -> f64 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 || !union.is_finite() {
            return 0.0;
        }
        intersection / union
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Normal,
    Hard,
}

impl Difficulty {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "normal" => Some(Self::Normal),
            "easy" => Some(Self::Easy),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedLabel {
    pub class_id: String,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    #[serde(default)]
    pub difficulty: Difficulty,
}

/// Lifecycle of a benchmark entry. Declaration order is the lifecycle order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Ready,
    Labeled,
    Resolved,
}

impl EntryStatus {
    pub const ALL: [EntryStatus; 4] = [Self::Pending, Self::Ready, Self::Labeled, Self::Resolved];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Labeled => "labeled",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" | "todo" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "labeled" | "labelled" => Some(Self::Labeled),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntrySource {
    Manual,
    Kaggle,
    OnlineSuggestion,
    SyntheticNegative,
}

impl EntrySource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Kaggle => "kaggle",
            Self::OnlineSuggestion => "online-suggestion",
            Self::SyntheticNegative => "synthetic-negative",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "" | "manual" => Some(Self::Manual),
            "kaggle" => Some(Self::Kaggle),
            "online-suggestion" | "online" => Some(Self::OnlineSuggestion),
            "synthetic-negative" | "negative" => Some(Self::SyntheticNegative),
            _ => None,
        }
    }
}

/// Set on entries that lost a fingerprint group during dedupe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalMarker {
    pub group: String,
    pub kept_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkEntry {
    pub id: String,
    pub image_ref: String,
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    #[serde(default)]
    pub expected_labels: Vec<ExpectedLabel>,
    pub status: EntryStatus,
    pub source: EntrySource,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<RemovalMarker>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unresolved: bool,
}

impl BenchmarkEntry {
    /// Builds a pending entry whose id and fingerprint come from the image ref.
    pub fn new(image_ref: &str, source: EntrySource) -> Self {
        let fingerprint = fingerprint_image_ref(image_ref);
        Self {
            id: derive_entry_id(&fingerprint),
            image_ref: image_ref.trim().to_string(),
            cache_path: None,
            expected_labels: Vec::new(),
            status: EntryStatus::Pending,
            source,
            fingerprint,
            removed: None,
            unresolved: false,
        }
    }

    #[cfg(test)]
    pub fn with_labels(mut self, labels: Vec<ExpectedLabel>) -> Self {
        self.expected_labels = labels;
        self
    }

    pub fn with_status(mut self, status: EntryStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_negative(&self) -> bool {
        self.expected_labels.is_empty()
    }

    pub fn is_removed(&self) -> bool {
        self.removed.is_some()
    }

    /// Resolved, attached to a cached image and not suppressed.
    pub fn is_evaluable(&self) -> bool {
        self.status == EntryStatus::Resolved
            && self.cache_path.is_some()
            && !self.unresolved
            && !self.is_removed()
    }

    pub fn class_ids(&self) -> BTreeSet<&str> {
        self.expected_labels
            .iter()
            .map(|label| label.class_id.as_str())
            .collect()
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.id.trim().is_empty() {
            return Err(BenchmarkError::validation(format!(
                "entry with image_ref '{}' has an empty id",
                self.image_ref
            )));
        }

        for (index, label) in self.expected_labels.iter().enumerate() {
            if label.class_id.trim().is_empty() {
                return Err(BenchmarkError::validation(format!(
                    "entry {} label {index} has an empty class_id",
                    self.id
                )));
            }
            if !label.bbox.is_normalized() {
                let b = label.bbox;
                return Err(BenchmarkError::validation(format!(
                    "entry {} label {index} box ({}, {}, {}, {}) is not normalized",
                    self.id, b.x1, b.y1, b.x2, b.y2
                )));
            }
        }

        if self.source == EntrySource::SyntheticNegative && !self.expected_labels.is_empty() {
            return Err(BenchmarkError::validation(format!(
                "entry {} is a synthetic negative but carries {} expected labels",
                self.id,
                self.expected_labels.len()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkManifest {
    pub manifest_version: u32,
    pub entries: Vec<BenchmarkEntry>,
}

impl Default for BenchmarkManifest {
    fn default() -> Self {
        Self {
            manifest_version: MANIFEST_VERSION,
            entries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: String,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub score: f64,
}

/// Model output for one image, keyed by the benchmark entry id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSet {
    pub entry_id: String,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionsFile {
    #[serde(default)]
    pub model: Option<String>,
    pub predictions: Vec<PredictionSet>,
}
