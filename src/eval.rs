//! Detection scoring.
//!
//! `evaluate` runs the matcher over every evaluable entry of a resolved
//! manifest and folds the results into dataset metrics. `compare` diffs two
//! such runs.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{BenchmarkError, CoreResult};
use crate::manifest::ResolvedManifest;
use crate::model::{Detection, EntrySource, ExpectedLabel, PredictionSet};

mod aggregate;
mod compare;
mod matcher;

pub use aggregate::{
    AggregateMetrics, ClassMetrics, CountedKey, ErrorAnalysis, MetricCounts, MetricsAccumulator,
    RecommendedAction, RetrainingPriority,
};
pub use compare::{
    CategoryCounts, ComparisonReport, EntryChange, EntryComparison, MetricDelta, NEGATIVE_CLASS,
    OverlapMetrics, compare,
};
pub use matcher::{
    ClassTally, DEFAULT_IOU_THRESHOLD, DEFAULT_SCORE_THRESHOLD, MatchResult, MatchThresholds,
    MatchedPair, match_detections,
};

pub const DEFAULT_TOP_N: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOptions {
    pub thresholds: MatchThresholds,
    /// Classes the model can emit. Expected labels outside this set are ignored.
    pub supported_classes: Option<BTreeSet<String>>,
    pub top_n: usize,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            thresholds: MatchThresholds::default(),
            supported_classes: None,
            top_n: DEFAULT_TOP_N,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryEvaluation {
    pub entry_id: String,
    pub positive: bool,
    pub expected_classes: Vec<String>,
    pub result: MatchResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntries {
    pub unresolved: Vec<String>,
    pub unsupported: Vec<String>,
    pub missing_predictions: Vec<String>,
    pub unknown_predictions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub thresholds: MatchThresholds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_classes: Option<BTreeSet<String>>,
    pub metrics: AggregateMetrics,
    /// Same metrics restricted to each entry source.
    #[serde(default)]
    pub by_source: BTreeMap<String, AggregateMetrics>,
    pub analysis: ErrorAnalysis,
    pub entries: Vec<EntryEvaluation>,
    pub skipped: SkippedEntries,
}

/// Scores `predictions` against every evaluable entry of `manifest`.
///
/// Entries flagged unresolved are listed but never scored. An evaluable entry
/// without a prediction set is scored as if the model returned nothing.
pub fn evaluate(
    manifest: &ResolvedManifest,
    predictions: &[PredictionSet],
    options: &EvaluationOptions,
) -> CoreResult<Evaluation> {
    options.thresholds.validate()?;

    let mut by_entry: HashMap<&str, &[Detection]> = HashMap::with_capacity(predictions.len());
    for set in predictions {
        if by_entry
            .insert(set.entry_id.as_str(), set.detections.as_slice())
            .is_some()
        {
            return Err(BenchmarkError::validation(format!(
                "predictions contain entry {} more than once",
                set.entry_id
            )));
        }
    }

    let mut skipped = SkippedEntries::default();
    let mut by_source: BTreeMap<EntrySource, MetricsAccumulator> = BTreeMap::new();
    let mut entries = Vec::new();
    let mut scored: BTreeSet<&str> = BTreeSet::new();

    for entry in &manifest.entries {
        if entry.unresolved && !entry.is_removed() {
            skipped.unresolved.push(entry.id.clone());
            continue;
        }
        if !entry.is_evaluable() {
            continue;
        }
        scored.insert(entry.id.as_str());

        let labels: Vec<ExpectedLabel> = match &options.supported_classes {
            Some(supported) => entry
                .expected_labels
                .iter()
                .filter(|label| supported.contains(&label.class_id))
                .cloned()
                .collect(),
            None => entry.expected_labels.clone(),
        };
        let positive = !entry.is_negative();
        if positive && labels.is_empty() {
            skipped.unsupported.push(entry.id.clone());
            continue;
        }

        let detections: &[Detection] = match by_entry.get(entry.id.as_str()) {
            Some(detections) => *detections,
            None => {
                skipped.missing_predictions.push(entry.id.clone());
                &[]
            }
        };

        let result = match_detections(&labels, detections, &options.thresholds)?;
        by_source
            .entry(entry.source)
            .or_default()
            .add_entry(entry, &result);

        let expected_classes: BTreeSet<&str> =
            labels.iter().map(|label| label.class_id.as_str()).collect();
        entries.push(EntryEvaluation {
            entry_id: entry.id.clone(),
            positive,
            expected_classes: expected_classes.into_iter().map(str::to_string).collect(),
            result,
        });
    }

    skipped.unknown_predictions = predictions
        .iter()
        .filter(|set| !scored.contains(set.entry_id.as_str()))
        .map(|set| set.entry_id.clone())
        .collect();
    skipped.unknown_predictions.sort();

    let accumulator = by_source
        .values()
        .cloned()
        .fold(MetricsAccumulator::new(), MetricsAccumulator::merge);

    Ok(Evaluation {
        thresholds: options.thresholds,
        supported_classes: options.supported_classes.clone(),
        metrics: accumulator.finish(),
        by_source: by_source
            .iter()
            .map(|(source, partial)| (source.as_str().to_string(), partial.finish()))
            .collect(),
        analysis: accumulator.analysis(options.top_n),
        entries,
        skipped,
    })
}
