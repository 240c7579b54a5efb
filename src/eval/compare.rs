use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::aggregate::{AggregateMetrics, MetricsAccumulator};
use super::{EntryEvaluation, Evaluation};

/// Per-class bucket for entries without expected labels.
pub const NEGATIVE_CLASS: &str = "(negative)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryChange {
    Improved,
    Regressed,
    UnchangedHit,
    UnchangedMiss,
    NewEntry,
    RemovedEntry,
}

impl EntryChange {
    pub fn classify(baseline_hit: Option<bool>, candidate_hit: Option<bool>) -> Option<Self> {
        match (baseline_hit, candidate_hit) {
            (Some(false), Some(true)) => Some(Self::Improved),
            (Some(true), Some(false)) => Some(Self::Regressed),
            (Some(true), Some(true)) => Some(Self::UnchangedHit),
            (Some(false), Some(false)) => Some(Self::UnchangedMiss),
            (None, Some(_)) => Some(Self::NewEntry),
            (Some(_), None) => Some(Self::RemovedEntry),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub improved: usize,
    pub regressed: usize,
    pub unchanged_hit: usize,
    pub unchanged_miss: usize,
    pub new_entry: usize,
    pub removed_entry: usize,
}

impl CategoryCounts {
    fn record(&mut self, change: EntryChange) {
        let slot = match change {
            EntryChange::Improved => &mut self.improved,
            EntryChange::Regressed => &mut self.regressed,
            EntryChange::UnchangedHit => &mut self.unchanged_hit,
            EntryChange::UnchangedMiss => &mut self.unchanged_miss,
            EntryChange::NewEntry => &mut self.new_entry,
            EntryChange::RemovedEntry => &mut self.removed_entry,
        };
        *slot += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryComparison {
    pub entry_id: String,
    pub change: EntryChange,
    pub baseline_hit: Option<bool>,
    pub candidate_hit: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub baseline: Option<f64>,
    pub candidate: Option<f64>,
    pub delta: Option<f64>,
}

impl MetricDelta {
    fn new(baseline: Option<f64>, candidate: Option<f64>) -> Self {
        let delta = match (baseline, candidate) {
            (Some(baseline), Some(candidate)) => Some(candidate - baseline),
            _ => None,
        };
        Self {
            baseline,
            candidate,
            delta,
        }
    }

    fn from_counts(baseline: usize, candidate: usize) -> Self {
        Self::new(Some(baseline as f64), Some(candidate as f64))
    }
}

/// Both runs re-aggregated over the entries they have in common.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlapMetrics {
    pub entry_count: usize,
    pub baseline: AggregateMetrics,
    pub candidate: AggregateMetrics,
    pub metric_deltas: BTreeMap<String, MetricDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub counts: CategoryCounts,
    pub per_class: BTreeMap<String, CategoryCounts>,
    pub entry_ids: BTreeMap<EntryChange, Vec<String>>,
    pub entries: Vec<EntryComparison>,
    pub metric_deltas: BTreeMap<String, MetricDelta>,
    pub overlap: OverlapMetrics,
}

/// Diffs two evaluation runs entry by entry, keyed on entry id.
pub fn compare(baseline: &Evaluation, candidate: &Evaluation) -> ComparisonReport {
    let baseline_entries = index_entries(baseline);
    let candidate_entries = index_entries(candidate);
    let all_ids: BTreeSet<&str> = baseline_entries
        .keys()
        .chain(candidate_entries.keys())
        .copied()
        .collect();

    let mut counts = CategoryCounts::default();
    let mut per_class: BTreeMap<String, CategoryCounts> = BTreeMap::new();
    let mut entry_ids: BTreeMap<EntryChange, Vec<String>> = BTreeMap::new();
    let mut entries = Vec::with_capacity(all_ids.len());
    let mut overlap_baseline = MetricsAccumulator::new();
    let mut overlap_candidate = MetricsAccumulator::new();
    let mut overlap_count = 0;

    for entry_id in all_ids {
        let before = baseline_entries.get(entry_id).copied();
        let after = candidate_entries.get(entry_id).copied();
        let baseline_hit = before.map(|entry| entry.result.any_hit);
        let candidate_hit = after.map(|entry| entry.result.any_hit);
        let Some(change) = EntryChange::classify(baseline_hit, candidate_hit) else {
            continue;
        };

        counts.record(change);
        for class_id in entry_classes(before, after) {
            per_class.entry(class_id).or_default().record(change);
        }
        entry_ids
            .entry(change)
            .or_default()
            .push(entry_id.to_string());
        entries.push(EntryComparison {
            entry_id: entry_id.to_string(),
            change,
            baseline_hit,
            candidate_hit,
        });

        if let (Some(before), Some(after)) = (before, after) {
            overlap_baseline.add(before.positive, &before.result);
            overlap_candidate.add(after.positive, &after.result);
            overlap_count += 1;
        }
    }

    let overlap_baseline = overlap_baseline.finish();
    let overlap_candidate = overlap_candidate.finish();
    let overlap = OverlapMetrics {
        entry_count: overlap_count,
        metric_deltas: metric_deltas(&overlap_baseline, &overlap_candidate),
        baseline: overlap_baseline,
        candidate: overlap_candidate,
    };

    ComparisonReport {
        counts,
        per_class,
        entry_ids,
        entries,
        metric_deltas: metric_deltas(&baseline.metrics, &candidate.metrics),
        overlap,
    }
}

fn index_entries(evaluation: &Evaluation) -> BTreeMap<&str, &EntryEvaluation> {
    evaluation
        .entries
        .iter()
        .map(|entry| (entry.entry_id.as_str(), entry))
        .collect()
}

fn entry_classes(
    before: Option<&EntryEvaluation>,
    after: Option<&EntryEvaluation>,
) -> BTreeSet<String> {
    let mut classes: BTreeSet<String> = before
        .into_iter()
        .chain(after)
        .flat_map(|entry| entry.expected_classes.iter().cloned())
        .collect();
    if classes.is_empty() {
        classes.insert(NEGATIVE_CLASS.to_string());
    }
    classes
}

fn metric_deltas(
    baseline: &AggregateMetrics,
    candidate: &AggregateMetrics,
) -> BTreeMap<String, MetricDelta> {
    let rates = [
        (
            "micro_precision",
            baseline.micro_precision,
            candidate.micro_precision,
        ),
        ("micro_recall", baseline.micro_recall, candidate.micro_recall),
        ("any_hit_rate", baseline.any_hit_rate, candidate.any_hit_rate),
        (
            "negative_clean_rate",
            baseline.negative_clean_rate,
            candidate.negative_clean_rate,
        ),
    ];
    let before = &baseline.counts;
    let after = &candidate.counts;
    let counters = [
        ("entries", before.entries, after.entries),
        ("true_positives", before.true_positives, after.true_positives),
        ("false_positives", before.false_positives, after.false_positives),
        ("false_negatives", before.false_negatives, after.false_negatives),
        ("any_hits", before.any_hits, after.any_hits),
        ("negative_clean", before.negative_clean, after.negative_clean),
    ];

    rates
        .into_iter()
        .map(|(name, before, after)| (name.to_string(), MetricDelta::new(before, after)))
        .chain(counters.into_iter().map(|(name, before, after)| {
            (name.to_string(), MetricDelta::from_counts(before, after))
        }))
        .collect()
}
