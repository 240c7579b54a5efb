use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{BenchmarkError, CoreResult};
use crate::model::{Detection, ExpectedLabel};

pub const DEFAULT_IOU_THRESHOLD: f64 = 0.5;
pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchThresholds {
    pub iou_threshold: f64,
    pub score_threshold: f64,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

impl MatchThresholds {
    pub fn new(iou_threshold: f64, score_threshold: f64) -> CoreResult<Self> {
        let thresholds = Self {
            iou_threshold,
            score_threshold,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    /// IoU must lie in `(0, 1]`, score in `[0, 1]`.
    pub fn validate(&self) -> CoreResult<()> {
        if !self.iou_threshold.is_finite() || self.iou_threshold <= 0.0 || self.iou_threshold > 1.0
        {
            return Err(BenchmarkError::ThresholdConfig(format!(
                "iou_threshold must be in (0, 1], got {}",
                self.iou_threshold
            )));
        }
        if !self.score_threshold.is_finite()
            || self.score_threshold < 0.0
            || self.score_threshold > 1.0
        {
            return Err(BenchmarkError::ThresholdConfig(format!(
                "score_threshold must be in [0, 1], got {}",
                self.score_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub prediction_index: usize,
    pub ground_truth_index: usize,
    pub class_id: String,
    pub iou: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassTally {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub any_hit: bool,
    pub surviving_predictions: usize,
    pub matches: Vec<MatchedPair>,
    pub per_class: BTreeMap<String, ClassTally>,
}

struct Candidate {
    prediction_index: usize,
    ground_truth_index: usize,
    iou: f64,
    score: f64,
}

/// Greedy one-to-one assignment of predictions to ground truth for one image.
///
/// Pairs are taken by IoU (desc), then prediction score (desc), then
/// prediction index, then ground-truth index. This is not a globally optimal
/// bipartite assignment when several boxes compete for one prediction, but it
/// is deterministic, and existing benchmark snapshots depend on this order.
pub fn match_detections(
    ground_truth: &[ExpectedLabel],
    predictions: &[Detection],
    thresholds: &MatchThresholds,
) -> CoreResult<MatchResult> {
    thresholds.validate()?;

    // NaN scores fail the comparison and are dropped with the low scorers.
    let surviving: Vec<usize> = predictions
        .iter()
        .enumerate()
        .filter(|(_, prediction)| prediction.score >= thresholds.score_threshold)
        .map(|(index, _)| index)
        .collect();

    let mut candidates = Vec::new();
    for &prediction_index in &surviving {
        let prediction = &predictions[prediction_index];
        for (ground_truth_index, label) in ground_truth.iter().enumerate() {
            if label.class_id != prediction.class_id {
                continue;
            }
            let iou = prediction.bbox.iou(&label.bbox);
            if iou >= thresholds.iou_threshold {
                candidates.push(Candidate {
                    prediction_index,
                    ground_truth_index,
                    iou,
                    score: prediction.score,
                });
            }
        }
    }

    candidates.sort_by(|left, right| {
        right
            .iou
            .total_cmp(&left.iou)
            .then_with(|| right.score.total_cmp(&left.score))
            .then_with(|| left.prediction_index.cmp(&right.prediction_index))
            .then_with(|| left.ground_truth_index.cmp(&right.ground_truth_index))
    });

    let mut prediction_taken = vec![false; predictions.len()];
    let mut ground_truth_taken = vec![false; ground_truth.len()];
    let mut matches = Vec::new();
    for candidate in candidates {
        if prediction_taken[candidate.prediction_index]
            || ground_truth_taken[candidate.ground_truth_index]
        {
            continue;
        }
        prediction_taken[candidate.prediction_index] = true;
        ground_truth_taken[candidate.ground_truth_index] = true;
        matches.push(MatchedPair {
            prediction_index: candidate.prediction_index,
            ground_truth_index: candidate.ground_truth_index,
            class_id: ground_truth[candidate.ground_truth_index].class_id.clone(),
            iou: candidate.iou,
        });
    }

    let mut per_class: BTreeMap<String, ClassTally> = BTreeMap::new();
    for pair in &matches {
        per_class.entry(pair.class_id.clone()).or_default().true_positives += 1;
    }
    for (index, label) in ground_truth.iter().enumerate() {
        if !ground_truth_taken[index] {
            per_class.entry(label.class_id.clone()).or_default().false_negatives += 1;
        }
    }
    for &index in &surviving {
        if !prediction_taken[index] {
            per_class
                .entry(predictions[index].class_id.clone())
                .or_default()
                .false_positives += 1;
        }
    }

    let true_positives = matches.len();
    let false_negatives = ground_truth.len() - true_positives;
    let false_positives = surviving.len() - true_positives;
    let any_hit = if ground_truth.is_empty() {
        surviving.is_empty()
    } else {
        true_positives > 0
    };

    Ok(MatchResult {
        true_positives,
        false_positives,
        false_negatives,
        any_hit,
        surviving_predictions: surviving.len(),
        matches,
        per_class,
    })
}
