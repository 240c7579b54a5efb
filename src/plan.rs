//! Coverage planner.
//!
//! Compares how many usable entries each taxonomy class has against a target,
//! ranks the gaps, and fills them from a pool of suggested images. The planner
//! reads the manifest store but never changes it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::dedup::{SuppressedCandidate, SuppressionReason, suppress_duplicates};
use crate::error::{BenchmarkError, CoreResult};
use crate::manifest::ManifestStore;
use crate::model::{BenchmarkEntry, EntrySource, EntryStatus};
use crate::taxonomy::Taxonomy;

pub const DEFAULT_TARGET_COUNT: usize = 10;
pub const DEFAULT_BATCH_SIZE: usize = 25;
pub const DEFAULT_NEGATIVE_TARGET: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub default_target: usize,
    pub class_targets: BTreeMap<String, usize>,
    pub class_weights: BTreeMap<String, f64>,
    pub batch_size: usize,
    pub max_selected: Option<usize>,
    /// Entries without expected labels the benchmark should hold.
    pub negative_target: usize,
    /// Entries below this status do not count toward coverage.
    pub min_status: EntryStatus,
    pub leaves_only: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_target: DEFAULT_TARGET_COUNT,
            class_targets: BTreeMap::new(),
            class_weights: BTreeMap::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_selected: None,
            negative_target: DEFAULT_NEGATIVE_TARGET,
            min_status: EntryStatus::Pending,
            leaves_only: false,
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.batch_size == 0 {
            return Err(BenchmarkError::validation("batch_size must be at least 1"));
        }
        for (class_id, weight) in &self.class_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(BenchmarkError::validation(format!(
                    "weight for class {class_id} must be a non-negative number, got {weight}"
                )));
            }
        }
        Ok(())
    }

    pub fn target_for(&self, class_id: &str) -> usize {
        self.class_targets
            .get(class_id)
            .copied()
            .unwrap_or(self.default_target)
    }

    pub fn weight_for(&self, class_id: &str) -> f64 {
        self.class_weights.get(class_id).copied().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityBand {
    Urgent,
    High,
    Medium,
    Low,
}

impl PriorityBand {
    /// Buckets a gap by how much of the target is still missing.
    pub fn for_gap(deficit: usize, target: usize) -> Self {
        if target == 0 {
            return Self::Low;
        }
        let ratio = deficit as f64 / target as f64;
        if ratio >= 0.75 {
            Self::Urgent
        } else if ratio >= 0.5 {
            Self::High
        } else if ratio >= 0.25 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

fn default_candidate_source() -> EntrySource {
    EntrySource::OnlineSuggestion
}

/// An image proposed by an external suggestion source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateImage {
    #[serde(default)]
    pub id: Option<String>,
    pub image_ref: String,
    #[serde(default)]
    pub candidate_classes: Vec<String>,
    #[serde(default = "default_candidate_source")]
    pub source: EntrySource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFile {
    pub candidates: Vec<CandidateImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassCoverage {
    pub current_count: usize,
    pub target_count: usize,
    pub deficit: usize,
    pub weight: f64,
    pub priority_score: f64,
    pub band: PriorityBand,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegativeCoverage {
    pub current_count: usize,
    pub target_count: usize,
    pub deficit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedImage {
    pub id: String,
    pub image_ref: String,
    pub class_id: String,
    pub source: EntrySource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelingBatch {
    pub index: usize,
    pub entry_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoveragePlan {
    pub classes: BTreeMap<String, ClassCoverage>,
    pub negatives: NegativeCoverage,
    pub queue: Vec<String>,
    pub selected: Vec<SelectedImage>,
    pub batches: Vec<LabelingBatch>,
    pub classes_without_candidates: Vec<String>,
    pub skipped_duplicates: Vec<SuppressedCandidate>,
}

impl CoveragePlan {
    pub fn total_deficit(&self) -> usize {
        self.classes.values().map(|class| class.deficit).sum()
    }
}

pub fn plan_coverage(
    taxonomy: &Taxonomy,
    store: &ManifestStore,
    candidates: &[CandidateImage],
    config: &PlannerConfig,
) -> CoreResult<CoveragePlan> {
    config.validate()?;

    let mut current: HashMap<&str, usize> = HashMap::new();
    let mut current_negatives = 0;
    for entry in store.active_entries() {
        if entry.status < config.min_status {
            continue;
        }
        if entry.is_negative() {
            current_negatives += 1;
        }
        for class_id in entry.class_ids() {
            *current.entry(class_id).or_default() += 1;
        }
    }

    let mut classes = BTreeMap::new();
    for node in taxonomy.nodes() {
        if config.leaves_only && !taxonomy.is_leaf(&node.id) {
            continue;
        }
        let current_count = current.get(node.id.as_str()).copied().unwrap_or(0);
        let target_count = config.target_for(&node.id);
        let deficit = target_count.saturating_sub(current_count);
        let weight = config.weight_for(&node.id);
        classes.insert(
            node.id.clone(),
            ClassCoverage {
                current_count,
                target_count,
                deficit,
                weight,
                priority_score: weight * deficit as f64,
                band: PriorityBand::for_gap(deficit, target_count),
            },
        );
    }

    let mut queue: Vec<&str> = classes
        .iter()
        .filter(|(_, coverage)| coverage.deficit > 0)
        .map(|(class_id, _)| class_id.as_str())
        .collect();
    queue.sort_by(|left, right| {
        classes[*right]
            .priority_score
            .total_cmp(&classes[*left].priority_score)
            .then_with(|| left.cmp(right))
    });

    let (pool, skipped_duplicates) = screen_candidates(taxonomy, store, candidates)?;

    let mut selected = Vec::new();
    let mut assigned: HashSet<&str> = HashSet::new();
    let limit = config.max_selected.unwrap_or(usize::MAX);
    'classes: for class_id in &queue {
        let mut remaining = classes[*class_id].deficit;
        for (entry, entry_classes) in &pool {
            if selected.len() >= limit {
                break 'classes;
            }
            if remaining == 0 {
                break;
            }
            if assigned.contains(entry.id.as_str()) || !entry_classes.contains(*class_id) {
                continue;
            }
            assigned.insert(entry.id.as_str());
            remaining -= 1;
            selected.push(SelectedImage {
                id: entry.id.clone(),
                image_ref: entry.image_ref.clone(),
                class_id: class_id.to_string(),
                source: entry.source,
            });
        }
    }

    let filled: BTreeSet<&str> = selected
        .iter()
        .map(|image| image.class_id.as_str())
        .collect();
    let classes_without_candidates = queue
        .iter()
        .filter(|class_id| !filled.contains(**class_id))
        .map(|class_id| class_id.to_string())
        .collect();

    let batches = selected
        .chunks(config.batch_size)
        .enumerate()
        .map(|(index, chunk)| LabelingBatch {
            index: index + 1,
            entry_ids: chunk.iter().map(|image| image.id.clone()).collect(),
        })
        .collect();

    Ok(CoveragePlan {
        negatives: NegativeCoverage {
            current_count: current_negatives,
            target_count: config.negative_target,
            deficit: config.negative_target.saturating_sub(current_negatives),
        },
        queue: queue.into_iter().map(str::to_string).collect(),
        classes,
        selected,
        batches,
        classes_without_candidates,
        skipped_duplicates,
    })
}

type CandidatePool = Vec<(BenchmarkEntry, BTreeSet<String>)>;

/// Drops candidates already in the manifest (same id or same image) or repeated
/// within the pool, and resolves the remaining class labels.
fn screen_candidates(
    taxonomy: &Taxonomy,
    store: &ManifestStore,
    candidates: &[CandidateImage],
) -> CoreResult<(CandidatePool, Vec<SuppressedCandidate>)> {
    let mut rows = Vec::with_capacity(candidates.len());
    let mut classes_by_fingerprint: HashMap<String, BTreeSet<String>> = HashMap::new();
    for (position, candidate) in candidates.iter().enumerate() {
        if candidate.image_ref.trim().is_empty() {
            return Err(BenchmarkError::validation(format!(
                "candidate at position {position} has an empty image_ref"
            )));
        }
        let mut entry = BenchmarkEntry::new(&candidate.image_ref, candidate.source);
        if let Some(id) = candidate.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            entry.id = id.to_string();
        }
        let resolved: BTreeSet<String> = candidate
            .candidate_classes
            .iter()
            .filter_map(|label| taxonomy.resolve_label(label))
            .map(str::to_string)
            .collect();
        classes_by_fingerprint
            .entry(entry.fingerprint.clone())
            .or_insert(resolved);
        rows.push(entry);
    }

    let outcome = suppress_duplicates(rows, store.entries());
    let mut skipped = outcome.suppressed;
    let mut pool = Vec::with_capacity(outcome.admitted.len());
    for entry in outcome.admitted {
        if store.get(&entry.id).is_some() {
            skipped.push(SuppressedCandidate {
                reason: SuppressionReason::DuplicateOfExisting {
                    existing_id: entry.id.clone(),
                },
                id: entry.id,
                image_ref: entry.image_ref,
                fingerprint: entry.fingerprint,
            });
            continue;
        }
        let classes = classes_by_fingerprint
            .remove(&entry.fingerprint)
            .unwrap_or_default();
        pool.push((entry, classes));
    }

    Ok((pool, skipped))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{CandidateImage, NegativeCoverage, PlannerConfig, PriorityBand, plan_coverage};
    use crate::dedup::SuppressionReason;
    use crate::error::BenchmarkError;
    use crate::manifest::ManifestStore;
    use crate::manifest::test_support::labeled_entry;
    use crate::model::{BenchmarkEntry, EntrySource, EntryStatus};
    use crate::taxonomy::{Taxonomy, TaxonomyNode};

    fn node(id: &str, parent_id: Option<&str>) -> TaxonomyNode {
        TaxonomyNode {
            id: id.to_string(),
            display_name: id.replace('_', " "),
            parent_id: parent_id.map(str::to_string),
            synonyms: BTreeSet::new(),
        }
    }

    fn taxonomy() -> Taxonomy {
        Taxonomy::from_nodes(vec![
            node("container", None),
            node("bottle", Some("container")),
            node("can", Some("container")),
            node("battery", None),
        ])
        .expect("taxonomy is valid")
    }

    fn store_with(counts: &[(&str, usize)]) -> ManifestStore {
        let mut entries = Vec::new();
        for (class_id, count) in counts {
            for index in 0..*count {
                entries.push(labeled_entry(
                    &format!("https://example.com/{class_id}/{index}.jpg"),
                    class_id,
                    EntryStatus::Labeled,
                ));
            }
        }
        ManifestStore::from_entries(entries).expect("store loads")
    }

    fn candidate(image_ref: &str, classes: &[&str]) -> CandidateImage {
        CandidateImage {
            id: None,
            image_ref: image_ref.to_string(),
            candidate_classes: classes.iter().map(|class| class.to_string()).collect(),
            source: EntrySource::OnlineSuggestion,
        }
    }

    #[test]
    fn deficit_is_target_minus_current() {
        let plan = plan_coverage(
            &taxonomy(),
            &store_with(&[("bottle", 3)]),
            &[],
            &PlannerConfig::default(),
        )
        .expect("plan builds");

        let bottle = &plan.classes["bottle"];
        assert_eq!(bottle.current_count, 3);
        assert_eq!(bottle.target_count, 10);
        assert_eq!(bottle.deficit, 7);
        assert_eq!(bottle.priority_score, 7.0);
        assert_eq!(bottle.band, PriorityBand::High);
        assert_eq!(plan.classes["battery"].band, PriorityBand::Urgent);
    }

    #[test]
    fn larger_deficit_ranks_first_and_weights_reorder() {
        let store = store_with(&[("bottle", 3), ("can", 8), ("container", 10)]);
        let plan = plan_coverage(&taxonomy(), &store, &[], &PlannerConfig::default())
            .expect("plan builds");
        assert_eq!(plan.queue, vec!["battery", "bottle", "can"]);

        let config = PlannerConfig {
            class_weights: [("can".to_string(), 10.0)].into_iter().collect(),
            ..PlannerConfig::default()
        };
        let weighted = plan_coverage(&taxonomy(), &store, &[], &config).expect("plan builds");
        assert_eq!(weighted.queue, vec!["can", "battery", "bottle"]);
    }

    #[test]
    fn candidates_fill_highest_priority_gap_once() {
        let store = store_with(&[("bottle", 9), ("can", 5), ("container", 10)]);
        let config = PlannerConfig {
            class_targets: [("battery".to_string(), 1)].into_iter().collect(),
            batch_size: 2,
            ..PlannerConfig::default()
        };
        let candidates = vec![
            candidate("https://img.example/1.jpg", &["can", "bottle"]),
            candidate("https://img.example/2.jpg", &["bottle"]),
            candidate("https://img.example/3.jpg", &["bottle", "can"]),
            candidate("https://img.example/4.jpg", &["battery"]),
        ];

        let plan = plan_coverage(&taxonomy(), &store, &candidates, &config).expect("plan builds");

        assert_eq!(plan.queue, vec!["can", "battery", "bottle"]);
        let assignments: Vec<(&str, &str)> = plan
            .selected
            .iter()
            .map(|image| (image.image_ref.as_str(), image.class_id.as_str()))
            .collect();
        assert_eq!(
            assignments,
            vec![
                ("https://img.example/1.jpg", "can"),
                ("https://img.example/3.jpg", "can"),
                ("https://img.example/4.jpg", "battery"),
                ("https://img.example/2.jpg", "bottle"),
            ]
        );
        let unique: BTreeSet<&str> = plan.selected.iter().map(|image| image.id.as_str()).collect();
        assert_eq!(unique.len(), plan.selected.len());
        assert_eq!(plan.batches.len(), 2);
        assert_eq!(plan.batches[1].index, 2);
    }

    #[test]
    fn candidates_already_in_manifest_are_skipped() {
        let store = store_with(&[("bottle", 1)]);
        let candidates = vec![
            candidate("https://EXAMPLE.com/bottle/0.jpg", &["bottle"]),
            candidate("https://img.example/new.jpg", &["bottle"]),
            candidate("https://img.example/new.jpg#again", &["bottle"]),
        ];

        let plan = plan_coverage(&taxonomy(), &store, &candidates, &PlannerConfig::default())
            .expect("plan builds");

        assert_eq!(plan.selected.len(), 1);
        assert_eq!(plan.skipped_duplicates.len(), 2);
        assert!(plan.classes_without_candidates.contains(&"battery".to_string()));
    }

    #[test]
    fn config_loads_from_partial_json_and_rejects_bad_values() {
        let config: PlannerConfig =
            serde_json::from_str(r#"{"default_target": 4, "leaves_only": true}"#)
                .expect("config parses");
        assert_eq!(config.default_target, 4);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.min_status, EntryStatus::Pending);

        let plan = plan_coverage(&taxonomy(), &ManifestStore::new(), &[], &config)
            .expect("plan builds");
        assert!(!plan.classes.contains_key("container"));
        assert_eq!(plan.total_deficit(), 12);

        let bad = PlannerConfig {
            batch_size: 0,
            ..PlannerConfig::default()
        };
        assert!(matches!(
            plan_coverage(&taxonomy(), &ManifestStore::new(), &[], &bad),
            Err(BenchmarkError::Validation(_))
        ));
    }

    #[test]
    fn negative_deficit_counts_entries_without_labels() {
        let mut entries: Vec<BenchmarkEntry> = (0..3)
            .map(|index| {
                BenchmarkEntry::new(
                    &format!("https://example.com/empty/{index}.jpg"),
                    EntrySource::SyntheticNegative,
                )
                .with_status(EntryStatus::Ready)
            })
            .collect();
        entries.push(labeled_entry("https://example.com/bottle.jpg", "bottle", EntryStatus::Labeled));
        let store = ManifestStore::from_entries(entries).expect("store loads");

        let plan = plan_coverage(&taxonomy(), &store, &[], &PlannerConfig::default())
            .expect("plan builds");
        assert_eq!(
            plan.negatives,
            NegativeCoverage {
                current_count: 3,
                target_count: 20,
                deficit: 17,
            }
        );

        let met = PlannerConfig {
            negative_target: 2,
            ..PlannerConfig::default()
        };
        let plan = plan_coverage(&taxonomy(), &store, &[], &met).expect("plan builds");
        assert_eq!(plan.negatives.deficit, 0);

        let labeled_only = PlannerConfig {
            min_status: EntryStatus::Labeled,
            ..PlannerConfig::default()
        };
        let plan = plan_coverage(&taxonomy(), &store, &[], &labeled_only).expect("plan builds");
        assert_eq!(plan.negatives.current_count, 0);
    }

    #[test]
    fn candidate_reusing_an_id_for_another_image_is_reported() {
        let mut first = candidate("https://img.example/1.jpg", &["battery"]);
        first.id = Some("suggest-1".to_string());
        let mut second = candidate("https://img.example/2.jpg", &["battery"]);
        second.id = Some("suggest-1".to_string());

        let plan = plan_coverage(
            &taxonomy(),
            &ManifestStore::new(),
            &[first, second],
            &PlannerConfig::default(),
        )
        .expect("plan builds");

        assert_eq!(plan.selected.len(), 1);
        assert_eq!(plan.skipped_duplicates.len(), 1);
        assert_eq!(
            plan.skipped_duplicates[0].reason,
            SuppressionReason::IdConflictInBatch {
                first_image_ref: "https://img.example/1.jpg".to_string()
            }
        );
    }
}
