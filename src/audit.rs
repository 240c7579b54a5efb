//! Dataset audit: taxonomy coverage and manifest hygiene.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::manifest::{ManifestCounts, ManifestStore};
use crate::model::EntryStatus;
use crate::taxonomy::Taxonomy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckResult {
    Pass,
    Failed,
    Pending,
}

impl CheckResult {
    fn from_failures(evaluated: bool, failures: usize) -> Self {
        if !evaluated {
            Self::Pending
        } else if failures == 0 {
            Self::Pass
        } else {
            Self::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditCheck {
    pub check_id: String,
    pub name: String,
    pub result: CheckResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_checks: usize,
    pub passed: usize,
    pub failed: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageRatios {
    pub taxonomy_class_count: usize,
    pub manifest_class_count_all: usize,
    pub manifest_class_count_labeled: usize,
    pub coverage_all: Option<f64>,
    pub coverage_labeled: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageGaps {
    pub missing_in_manifest: Vec<String>,
    pub missing_in_labeled_entries: Vec<String>,
    pub unknown_manifest_classes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateImage {
    pub fingerprint: String,
    pub entry_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub status: String,
    pub summary: AuditSummary,
    pub checks: Vec<AuditCheck>,
    pub entries: ManifestCounts,
    pub negative_share: Option<f64>,
    pub coverage: CoverageRatios,
    pub gaps: CoverageGaps,
    pub duplicate_images: Vec<DuplicateImage>,
    pub entries_without_image: Vec<String>,
}

impl AuditReport {
    pub fn passed(&self) -> bool {
        self.summary.failed == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditOptions {
    /// Only leaf classes are expected to carry labels.
    pub leaves_only: bool,
}

pub fn audit_dataset(
    taxonomy: &Taxonomy,
    store: &ManifestStore,
    options: AuditOptions,
) -> AuditReport {
    let taxonomy_classes: BTreeSet<&str> = taxonomy
        .nodes()
        .iter()
        .filter(|node| !options.leaves_only || taxonomy.is_leaf(&node.id))
        .map(|node| node.id.as_str())
        .collect();

    let mut classes_all: BTreeSet<&str> = BTreeSet::new();
    let mut classes_labeled: BTreeSet<&str> = BTreeSet::new();
    let mut by_fingerprint: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut entries_without_image = Vec::new();

    for entry in store.active_entries() {
        let classes = entry.class_ids();
        if entry.status >= EntryStatus::Labeled {
            classes_labeled.extend(classes.iter().copied());
        }
        classes_all.extend(classes);

        if entry.image_ref.trim().is_empty() {
            entries_without_image.push(entry.id.clone());
            continue;
        }
        by_fingerprint
            .entry(entry.fingerprint.as_str())
            .or_default()
            .push(entry.id.as_str());
    }

    let gaps = CoverageGaps {
        missing_in_manifest: difference(&taxonomy_classes, &classes_all),
        missing_in_labeled_entries: difference(&taxonomy_classes, &classes_labeled),
        unknown_manifest_classes: classes_all
            .iter()
            .filter(|class_id| !taxonomy.contains(class_id))
            .map(|class_id| class_id.to_string())
            .collect(),
    };

    let duplicate_images: Vec<DuplicateImage> = by_fingerprint
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(fingerprint, ids)| {
            let mut entry_ids: Vec<String> = ids.into_iter().map(str::to_string).collect();
            entry_ids.sort();
            DuplicateImage {
                fingerprint: fingerprint.to_string(),
                entry_ids,
            }
        })
        .collect();

    let counts = store.counts();
    let known_all = classes_all
        .iter()
        .filter(|class_id| taxonomy_classes.contains(*class_id))
        .count();
    let known_labeled = classes_labeled
        .iter()
        .filter(|class_id| taxonomy_classes.contains(*class_id))
        .count();
    let coverage = CoverageRatios {
        taxonomy_class_count: taxonomy_classes.len(),
        manifest_class_count_all: classes_all.len(),
        manifest_class_count_labeled: classes_labeled.len(),
        coverage_all: ratio(known_all, taxonomy_classes.len()),
        coverage_labeled: ratio(known_labeled, taxonomy_classes.len()),
    };

    let has_classes = !taxonomy_classes.is_empty();
    let has_entries = counts.active > 0;
    let labeled_total: usize = [EntryStatus::Labeled, EntryStatus::Resolved]
        .iter()
        .map(|status| counts.by_status.get(status.as_str()).copied().unwrap_or(0))
        .sum();

    let checks = vec![
        check(
            "A-001",
            "Manifest classes are known to the taxonomy",
            CheckResult::from_failures(has_entries, gaps.unknown_manifest_classes.len()),
        ),
        check(
            "A-002",
            "Every taxonomy class appears in the manifest",
            CheckResult::from_failures(has_classes, gaps.missing_in_manifest.len()),
        ),
        check(
            "A-003",
            "Every taxonomy class has labeled entries",
            CheckResult::from_failures(has_classes, gaps.missing_in_labeled_entries.len()),
        ),
        check(
            "A-004",
            "No image appears under two active entries",
            CheckResult::from_failures(has_entries, duplicate_images.len()),
        ),
        check(
            "A-005",
            "Every active entry has an image ref",
            CheckResult::from_failures(has_entries, entries_without_image.len()),
        ),
        check(
            "A-006",
            "Benchmark includes negative entries",
            CheckResult::from_failures(has_entries, usize::from(counts.negatives == 0)),
        ),
        check(
            "A-007",
            "Labeled entries resolve to cached images",
            CheckResult::from_failures(labeled_total > 0, counts.unresolved),
        ),
    ];

    let summary = summarize_checks(&checks);
    AuditReport {
        status: if summary.failed > 0 { "failed" } else { "passed" }.to_string(),
        summary,
        checks,
        negative_share: ratio(counts.negatives, counts.active),
        entries: counts,
        coverage,
        gaps,
        duplicate_images,
        entries_without_image,
    }
}

fn check(check_id: &str, name: &str, result: CheckResult) -> AuditCheck {
    AuditCheck {
        check_id: check_id.to_string(),
        name: name.to_string(),
        result,
    }
}

pub fn summarize_checks(checks: &[AuditCheck]) -> AuditSummary {
    let count = |result: CheckResult| checks.iter().filter(|check| check.result == result).count();
    AuditSummary {
        total_checks: checks.len(),
        passed: count(CheckResult::Pass),
        failed: count(CheckResult::Failed),
        pending: count(CheckResult::Pending),
    }
}

fn difference(left: &BTreeSet<&str>, right: &BTreeSet<&str>) -> Vec<String> {
    left.difference(right).map(|value| value.to_string()).collect()
}

fn ratio(numerator: usize, denominator: usize) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{AuditOptions, CheckResult, audit_dataset};
    use crate::manifest::ManifestStore;
    use crate::manifest::test_support::labeled_entry;
    use crate::model::{BenchmarkEntry, EntrySource, EntryStatus};
    use crate::taxonomy::{Taxonomy, TaxonomyNode};

    fn taxonomy() -> Taxonomy {
        let node = |id: &str| TaxonomyNode {
            id: id.to_string(),
            display_name: id.to_string(),
            parent_id: None,
            synonyms: BTreeSet::new(),
        };
        Taxonomy::from_nodes(vec![node("bottle"), node("can")]).expect("taxonomy is valid")
    }

    fn result_of(report: &super::AuditReport, check_id: &str) -> Option<CheckResult> {
        report
            .checks
            .iter()
            .find(|check| check.check_id == check_id)
            .map(|check| check.result)
    }

    #[test]
    fn healthy_dataset_passes_every_check() {
        let store = ManifestStore::from_entries(vec![
            labeled_entry("https://example.com/a.jpg", "bottle", EntryStatus::Labeled),
            labeled_entry("https://example.com/b.jpg", "can", EntryStatus::Labeled),
            BenchmarkEntry::new("https://example.com/empty.jpg", EntrySource::SyntheticNegative)
                .with_status(EntryStatus::Labeled),
        ])
        .expect("store loads");

        let report = audit_dataset(&taxonomy(), &store, AuditOptions::default());

        assert_eq!(report.status, "passed");
        assert_eq!(report.summary.failed, 0);
        assert_eq!(report.coverage.coverage_labeled, Some(1.0));
        assert!(report.negative_share.is_some_and(|share| share > 0.3 && share < 0.4));
    }

    #[test]
    fn gaps_unknown_classes_and_duplicates_fail() {
        let mut duplicate =
            labeled_entry("https://EXAMPLE.com/a.jpg", "bottle", EntryStatus::Ready);
        duplicate.id = "dup".to_string();
        let store = ManifestStore::from_entries(vec![
            labeled_entry("https://example.com/a.jpg", "bottle", EntryStatus::Ready),
            duplicate,
            labeled_entry("https://example.com/b.jpg", "spaceship", EntryStatus::Labeled),
        ])
        .expect("store loads");

        let report = audit_dataset(&taxonomy(), &store, AuditOptions::default());

        assert_eq!(report.status, "failed");
        assert_eq!(report.gaps.unknown_manifest_classes, vec!["spaceship".to_string()]);
        assert_eq!(report.gaps.missing_in_manifest, vec!["can".to_string()]);
        assert_eq!(
            report.gaps.missing_in_labeled_entries,
            vec!["bottle".to_string(), "can".to_string()]
        );
        assert_eq!(report.duplicate_images.len(), 1);
        assert_eq!(result_of(&report, "A-004"), Some(CheckResult::Failed));
        assert_eq!(result_of(&report, "A-006"), Some(CheckResult::Failed));
        assert_eq!(report.coverage.coverage_all, Some(0.5));
    }
}
