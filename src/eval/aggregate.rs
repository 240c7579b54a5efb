use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::matcher::MatchResult;
use crate::model::BenchmarkEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricCounts {
    pub entries: usize,
    pub positive_entries: usize,
    pub negative_entries: usize,
    pub any_hits: usize,
    pub negative_clean: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub support: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

/// Dataset-level scores. Rates are `None` when nothing fed their denominator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub micro_precision: Option<f64>,
    pub micro_recall: Option<f64>,
    pub any_hit_rate: Option<f64>,
    pub negative_clean_rate: Option<f64>,
    pub counts: MetricCounts,
    pub per_class: BTreeMap<String, ClassMetrics>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountedKey {
    pub key: String,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    CollectMorePositives,
    AddHardNegatives,
}

/// One row of the retraining priority table. Counts are per entry: a class is
/// hit in an entry when at least one of its boxes matched, and a false positive
/// when it was predicted there without being expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainingPriority {
    pub class_id: String,
    pub priority_score: f64,
    pub expected_count: usize,
    pub miss_count: usize,
    pub hit_count: usize,
    pub false_positive_count: usize,
    pub hit_rate: f64,
    pub recommended_action: RecommendedAction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub top_missed_classes: Vec<CountedKey>,
    pub top_false_positive_classes: Vec<CountedKey>,
    pub top_confusion_pairs: Vec<CountedKey>,
    #[serde(default)]
    pub priority_table: Vec<RetrainingPriority>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ClassCounters {
    true_positives: usize,
    false_positives: usize,
    false_negatives: usize,
    expected_entries: usize,
    hit_entries: usize,
    false_positive_entries: usize,
}

impl ClassCounters {
    fn absorb(&mut self, other: &ClassCounters) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
        self.expected_entries += other.expected_entries;
        self.hit_entries += other.hit_entries;
        self.false_positive_entries += other.false_positive_entries;
    }

    fn priority(&self, class_id: &str) -> RetrainingPriority {
        let expected = self.expected_entries;
        let hit = self.hit_entries;
        let miss = expected - hit;
        let false_positive = self.false_positive_entries;
        let hit_rate = ratio(hit, expected).unwrap_or(0.0);
        let priority_score =
            (miss * 2 + false_positive) as f64 + (1.0 - hit_rate) * expected as f64;

        RetrainingPriority {
            class_id: class_id.to_string(),
            priority_score,
            expected_count: expected,
            miss_count: miss,
            hit_count: hit,
            false_positive_count: false_positive,
            hit_rate,
            recommended_action: if miss >= false_positive {
                RecommendedAction::CollectMorePositives
            } else {
                RecommendedAction::AddHardNegatives
            },
        }
    }
}

/// Running totals over match results.
///
/// `add` and `merge` are order-independent, so entries can be scored on
/// separate workers and the partial accumulators combined afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsAccumulator {
    counts: MetricCounts,
    per_class: BTreeMap<String, ClassCounters>,
    confusion: BTreeMap<String, usize>,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, positive: bool, result: &MatchResult) {
        let counts = &mut self.counts;
        counts.entries += 1;
        counts.true_positives += result.true_positives;
        counts.false_positives += result.false_positives;
        counts.false_negatives += result.false_negatives;

        if positive {
            counts.positive_entries += 1;
            if result.any_hit {
                counts.any_hits += 1;
            }
        } else {
            counts.negative_entries += 1;
            if result.surviving_predictions == 0 {
                counts.negative_clean += 1;
            }
        }

        let expected: Vec<&str> = result
            .per_class
            .iter()
            .filter(|(_, tally)| tally.true_positives + tally.false_negatives > 0)
            .map(|(class_id, _)| class_id.as_str())
            .collect();

        for (class_id, tally) in &result.per_class {
            let is_expected = expected.contains(&class_id.as_str());
            let class = self.per_class.entry(class_id.clone()).or_default();
            class.absorb(&ClassCounters {
                true_positives: tally.true_positives,
                false_positives: tally.false_positives,
                false_negatives: tally.false_negatives,
                expected_entries: usize::from(is_expected),
                hit_entries: usize::from(tally.true_positives > 0),
                false_positive_entries: usize::from(!is_expected && tally.false_positives > 0),
            });
        }
        for (predicted, tally) in &result.per_class {
            if tally.false_positives == 0 || expected.contains(&predicted.as_str()) {
                continue;
            }
            for expected_class in &expected {
                *self
                    .confusion
                    .entry(format!("{expected_class} -> {predicted}"))
                    .or_default() += 1;
            }
        }
    }

    pub fn add_entry(&mut self, entry: &BenchmarkEntry, result: &MatchResult) {
        self.add(!entry.is_negative(), result);
    }

    pub fn merge(mut self, other: MetricsAccumulator) -> Self {
        let counts = &mut self.counts;
        counts.entries += other.counts.entries;
        counts.positive_entries += other.counts.positive_entries;
        counts.negative_entries += other.counts.negative_entries;
        counts.any_hits += other.counts.any_hits;
        counts.negative_clean += other.counts.negative_clean;
        counts.true_positives += other.counts.true_positives;
        counts.false_positives += other.counts.false_positives;
        counts.false_negatives += other.counts.false_negatives;

        for (class_id, tally) in other.per_class {
            self.per_class.entry(class_id).or_default().absorb(&tally);
        }
        for (pair, count) in other.confusion {
            *self.confusion.entry(pair).or_default() += count;
        }
        self
    }

    pub fn finish(&self) -> AggregateMetrics {
        let counts = self.counts;
        let per_class = self
            .per_class
            .iter()
            .map(|(class_id, tally)| {
                let metrics = ClassMetrics {
                    precision: ratio(
                        tally.true_positives,
                        tally.true_positives + tally.false_positives,
                    ),
                    recall: ratio(
                        tally.true_positives,
                        tally.true_positives + tally.false_negatives,
                    ),
                    support: tally.true_positives + tally.false_negatives,
                    true_positives: tally.true_positives,
                    false_positives: tally.false_positives,
                    false_negatives: tally.false_negatives,
                };
                (class_id.clone(), metrics)
            })
            .collect();

        AggregateMetrics {
            micro_precision: ratio(
                counts.true_positives,
                counts.true_positives + counts.false_positives,
            ),
            micro_recall: ratio(
                counts.true_positives,
                counts.true_positives + counts.false_negatives,
            ),
            any_hit_rate: ratio(counts.any_hits, counts.positive_entries),
            negative_clean_rate: ratio(counts.negative_clean, counts.negative_entries),
            counts,
            per_class,
        }
    }

    /// Most-missed classes, most false-positive classes, the
    /// `expected -> predicted` pairs behind stray detections, and the
    /// retraining priority table.
    pub fn analysis(&self, top: usize) -> ErrorAnalysis {
        let missed = self
            .per_class
            .iter()
            .map(|(class_id, tally)| (class_id.as_str(), tally.false_negatives));
        let false_positives = self
            .per_class
            .iter()
            .map(|(class_id, tally)| (class_id.as_str(), tally.false_positives));
        let confusion = self
            .confusion
            .iter()
            .map(|(pair, count)| (pair.as_str(), *count));

        let mut priority_table: Vec<RetrainingPriority> = self
            .per_class
            .iter()
            .filter(|(_, tally)| tally.expected_entries + tally.false_positive_entries > 0)
            .map(|(class_id, tally)| tally.priority(class_id))
            .collect();
        priority_table.sort_by(|left, right| {
            right
                .priority_score
                .total_cmp(&left.priority_score)
                .then(right.miss_count.cmp(&left.miss_count))
                .then(right.false_positive_count.cmp(&left.false_positive_count))
                .then_with(|| left.class_id.cmp(&right.class_id))
        });
        priority_table.truncate(top);

        ErrorAnalysis {
            top_missed_classes: top_counts(missed, top),
            top_false_positive_classes: top_counts(false_positives, top),
            top_confusion_pairs: top_counts(confusion, top),
            priority_table,
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> Option<f64> {
    if denominator == 0 {
        return None;
    }
    Some(numerator as f64 / denominator as f64)
}

fn top_counts<'a>(values: impl Iterator<Item = (&'a str, usize)>, top: usize) -> Vec<CountedKey> {
    let mut rows: Vec<CountedKey> = values
        .filter(|(_, count)| *count > 0)
        .map(|(key, count)| CountedKey {
            key: key.to_string(),
            count,
        })
        .collect();
    rows.sort_by(|left, right| right.count.cmp(&left.count).then(left.key.cmp(&right.key)));
    rows.truncate(top);
    rows
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::{AggregateMetrics, MatchResult, MetricsAccumulator, RecommendedAction};
    use crate::eval::matcher::{MatchThresholds, match_detections};
    use crate::model::{
        BenchmarkEntry, BoundingBox, Detection, Difficulty, EntrySource, ExpectedLabel,
    };

    fn entry(name: &str, labels: &[(&str, BoundingBox)]) -> BenchmarkEntry {
        BenchmarkEntry::new(&format!("https://example.com/{name}.jpg"), EntrySource::Manual)
            .with_labels(
                labels
                    .iter()
                    .map(|(class_id, bbox)| ExpectedLabel {
                        class_id: class_id.to_string(),
                        bbox: *bbox,
                        difficulty: Difficulty::Normal,
                    })
                    .collect(),
            )
    }

    fn aggregate<'a>(
        results: impl IntoIterator<Item = (&'a BenchmarkEntry, &'a MatchResult)>,
    ) -> AggregateMetrics {
        let mut accumulator = MetricsAccumulator::new();
        for (entry, result) in results {
            accumulator.add_entry(entry, result);
        }
        accumulator.finish()
    }

    fn det(class_id: &str, bbox: BoundingBox, score: f64) -> Detection {
        Detection {
            class_id: class_id.to_string(),
            bbox,
            score,
        }
    }

    fn scenario() -> Vec<(BenchmarkEntry, crate::eval::matcher::MatchResult)> {
        let a = BoundingBox::new(0.1, 0.1, 0.5, 0.5);
        let b = BoundingBox::new(0.6, 0.6, 0.9, 0.9);
        let thresholds = MatchThresholds::default();

        let cases = vec![
            (entry("hit", &[("bottle", a)]), vec![det("bottle", a, 0.9)]),
            (
                entry("miss", &[("can", a)]),
                vec![det("bottle", b, 0.8)],
            ),
            (entry("clean", &[]), vec![]),
            (entry("noisy", &[]), vec![det("can", b, 0.7)]),
        ];

        cases
            .into_iter()
            .map(|(entry, predictions)| {
                let result = match_detections(&entry.expected_labels, &predictions, &thresholds)
                    .expect("thresholds are valid");
                (entry, result)
            })
            .collect()
    }

    #[test]
    fn aggregate_computes_micro_and_entry_rates() {
        let rows = scenario();
        let metrics = aggregate(rows.iter().map(|(entry, result)| (entry, result)));

        assert_eq!(metrics.counts.true_positives, 1);
        assert_eq!(metrics.counts.false_positives, 2);
        assert_eq!(metrics.counts.false_negatives, 1);
        assert_relative_eq!(metrics.micro_precision.unwrap_or_default(), 1.0 / 3.0);
        assert_relative_eq!(metrics.micro_recall.unwrap_or_default(), 0.5);
        assert_eq!(metrics.any_hit_rate, Some(0.5));
        assert_eq!(metrics.negative_clean_rate, Some(0.5));

        let bottle = &metrics.per_class["bottle"];
        assert_eq!(bottle.support, 1);
        assert_eq!(bottle.recall, Some(1.0));
        assert_eq!(bottle.precision, Some(0.5));
        let can = &metrics.per_class["can"];
        assert_eq!(can.support, 1);
        assert_eq!(can.recall, Some(0.0));
    }

    #[test]
    fn empty_input_reports_no_rates() {
        let metrics = aggregate(std::iter::empty());
        assert_eq!(metrics.micro_precision, None);
        assert_eq!(metrics.micro_recall, None);
        assert_eq!(metrics.any_hit_rate, None);
        assert_eq!(metrics.negative_clean_rate, None);
    }

    #[test]
    fn single_clean_negative_scores_full_clean_rate() {
        let negative = entry("empty", &[]);
        let result = match_detections(&[], &[], &MatchThresholds::default())
            .expect("thresholds are valid");
        let metrics = aggregate([(&negative, &result)]);

        assert_eq!(metrics.negative_clean_rate, Some(1.0));
        assert_eq!(metrics.any_hit_rate, None);
    }

    #[test]
    fn merged_partials_equal_single_pass_in_any_order() {
        let rows = scenario();
        let mut whole = MetricsAccumulator::new();
        for (entry, result) in &rows {
            whole.add_entry(entry, result);
        }

        let mut front = MetricsAccumulator::new();
        let mut back = MetricsAccumulator::new();
        for (entry, result) in &rows[..2] {
            front.add_entry(entry, result);
        }
        for (entry, result) in rows[2..].iter().rev() {
            back.add_entry(entry, result);
        }

        assert_eq!(front.clone().merge(back.clone()), whole);
        assert_eq!(back.merge(front), whole);
    }

    #[test]
    fn analysis_lists_confusions_for_stray_predictions() {
        let rows = scenario();
        let mut accumulator = MetricsAccumulator::new();
        for (entry, result) in &rows {
            accumulator.add_entry(entry, result);
        }
        let analysis = accumulator.analysis(5);

        assert_eq!(analysis.top_confusion_pairs.len(), 1);
        assert_eq!(analysis.top_confusion_pairs[0].key, "can -> bottle");
        assert_eq!(analysis.top_missed_classes[0].key, "can");
        let fp_keys: Vec<&str> = analysis
            .top_false_positive_classes
            .iter()
            .map(|row| row.key.as_str())
            .collect();
        assert_eq!(fp_keys, vec!["bottle", "can"]);
    }

    #[test]
    fn priority_table_ranks_misses_above_stray_predictions() {
        let rows = scenario();
        let mut accumulator = MetricsAccumulator::new();
        for (entry, result) in &rows {
            accumulator.add_entry(entry, result);
        }
        let table = accumulator.analysis(5).priority_table;

        let order: Vec<&str> = table.iter().map(|row| row.class_id.as_str()).collect();
        assert_eq!(order, vec!["can", "bottle"]);

        let can = &table[0];
        assert_eq!(can.expected_count, 1);
        assert_eq!(can.hit_count, 0);
        assert_eq!(can.miss_count, 1);
        assert_eq!(can.false_positive_count, 1);
        assert_relative_eq!(can.priority_score, 4.0);
        assert_eq!(can.recommended_action, RecommendedAction::CollectMorePositives);

        let bottle = &table[1];
        assert_eq!(bottle.expected_count, 1);
        assert_eq!(bottle.hit_count, 1);
        assert_relative_eq!(bottle.hit_rate, 1.0);
        assert_eq!(bottle.false_positive_count, 1);
        assert_relative_eq!(bottle.priority_score, 1.0);
        assert_eq!(bottle.recommended_action, RecommendedAction::AddHardNegatives);

        assert_eq!(accumulator.analysis(1).priority_table.len(), 1);
    }
}
