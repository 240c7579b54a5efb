use std::collections::HashMap;

use serde::Serialize;

use super::{ManifestStore, ensure_unique_ids};
use crate::dedup::{fingerprint_image_ref, normalize_image_ref};
use crate::error::{BenchmarkError, CoreResult};
use crate::model::{BenchmarkEntry, EntrySource, EntryStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub rejected: usize,
    pub inserted_ids: Vec<String>,
    pub updated_ids: Vec<String>,
    pub rejected_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub store: ManifestStore,
    pub report: MergeReport,
}

impl ManifestStore {
    /// Folds a submission into the manifest.
    ///
    /// Known ids take the incoming labels and status only when the incoming
    /// status is strictly later in the lifecycle. Equal statuses count as
    /// unchanged, earlier ones as rejected. Submissions never go past
    /// `labeled`; only `resolve` marks an entry resolved. Unknown ids are
    /// inserted as `pending`. Any invalid row fails the whole merge.
    pub fn merge(&self, incoming: &[BenchmarkEntry]) -> CoreResult<MergeOutcome> {
        ensure_unique_ids(incoming)?;
        for entry in incoming {
            entry.validate()?;
        }

        let mut entries = self.entries.clone();
        let mut index: HashMap<String, usize> = entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.id.clone(), position))
            .collect();
        let mut report = MergeReport::default();

        for candidate in incoming {
            let Some(position) = index.get(&candidate.id).copied() else {
                let inserted = insert_as_pending(candidate);
                index.insert(inserted.id.clone(), entries.len());
                report.inserted += 1;
                report.inserted_ids.push(inserted.id.clone());
                entries.push(inserted);
                continue;
            };

            let existing = &mut entries[position];
            let submitted = candidate.status.min(EntryStatus::Labeled);
            if submitted > existing.status {
                apply_update(existing, candidate, submitted)?;
                report.updated += 1;
                report.updated_ids.push(candidate.id.clone());
            } else if candidate.status >= existing.status {
                report.unchanged += 1;
            } else {
                report.rejected += 1;
                report.rejected_ids.push(candidate.id.clone());
            }
        }

        Ok(MergeOutcome {
            store: ManifestStore { entries },
            report,
        })
    }
}

fn insert_as_pending(candidate: &BenchmarkEntry) -> BenchmarkEntry {
    let mut entry = candidate.clone();
    entry.image_ref = entry.image_ref.trim().to_string();
    entry.fingerprint = fingerprint_image_ref(&entry.image_ref);
    entry.status = EntryStatus::Pending;
    entry.cache_path = None;
    entry.unresolved = false;
    entry.removed = None;
    entry
}

fn apply_update(
    existing: &mut BenchmarkEntry,
    candidate: &BenchmarkEntry,
    status: EntryStatus,
) -> CoreResult<()> {
    if existing.source == EntrySource::SyntheticNegative && !candidate.expected_labels.is_empty() {
        return Err(BenchmarkError::validation(format!(
            "entry {} is a synthetic negative and cannot take {} expected labels",
            existing.id,
            candidate.expected_labels.len()
        )));
    }

    existing.expected_labels = candidate.expected_labels.clone();
    existing.status = status;

    let incoming_ref = candidate.image_ref.trim();
    let image_changed = !incoming_ref.is_empty()
        && normalize_image_ref(incoming_ref) != normalize_image_ref(&existing.image_ref);
    if image_changed {
        existing.image_ref = incoming_ref.to_string();
        existing.fingerprint = fingerprint_image_ref(incoming_ref);
        existing.cache_path = None;
        existing.unresolved = false;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::ManifestStore;
    use super::super::test_support::labeled_entry;
    use crate::error::BenchmarkError;
    use crate::model::{BenchmarkEntry, BoundingBox, EntrySource, EntryStatus};

    #[test]
    fn merge_inserts_new_entries_as_pending() {
        let store = ManifestStore::new();
        let incoming = labeled_entry("https://example.com/a.jpg", "bottle", EntryStatus::Labeled);

        let outcome = store.merge(std::slice::from_ref(&incoming)).expect("merge succeeds");
        assert_eq!(outcome.report.inserted, 1);
        assert_eq!(outcome.report.inserted_ids, vec![incoming.id.clone()]);

        let stored = outcome.store.get(&incoming.id).expect("entry inserted");
        assert_eq!(stored.status, EntryStatus::Pending);
        assert_eq!(stored.expected_labels, incoming.expected_labels);
        assert!(store.is_empty());
    }

    #[test]
    fn merge_prefers_strictly_later_status() {
        let existing = labeled_entry("https://example.com/a.jpg", "bottle", EntryStatus::Ready);
        let store = ManifestStore::from_entries(vec![existing.clone()]).expect("store loads");

        let later = labeled_entry("https://example.com/a.jpg", "can", EntryStatus::Labeled);
        let same = labeled_entry("https://example.com/a.jpg", "jar", EntryStatus::Ready);
        let earlier = labeled_entry("https://example.com/a.jpg", "cup", EntryStatus::Pending);

        let updated = store.merge(&[later]).expect("merge succeeds");
        assert_eq!(updated.report.updated, 1);
        let entry = updated.store.get(&existing.id).expect("entry present");
        assert_eq!(entry.status, EntryStatus::Labeled);
        assert_eq!(entry.expected_labels[0].class_id, "can");

        let unchanged = store.merge(&[same]).expect("merge succeeds");
        assert_eq!(unchanged.report.unchanged, 1);
        assert_eq!(unchanged.store, store);

        let rejected = store.merge(&[earlier]).expect("merge succeeds");
        assert_eq!(rejected.report.rejected, 1);
        assert_eq!(rejected.report.rejected_ids, vec![existing.id.clone()]);
        assert_eq!(rejected.store, store);
    }

    #[test]
    fn merge_with_invalid_box_changes_nothing() {
        let store = ManifestStore::from_entries(vec![labeled_entry(
            "https://example.com/a.jpg",
            "bottle",
            EntryStatus::Ready,
        )])
        .expect("store loads");

        let valid = labeled_entry("https://example.com/b.jpg", "can", EntryStatus::Ready);
        let mut invalid = labeled_entry("https://example.com/c.jpg", "can", EntryStatus::Ready);
        invalid.expected_labels[0].bbox = BoundingBox::new(0.6, 0.1, 0.4, 0.5);

        let err = store.merge(&[valid, invalid]).expect_err("invalid box must abort");
        assert!(matches!(err, BenchmarkError::Validation(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn merge_rejects_duplicate_ids_in_submission() {
        let entry = labeled_entry("https://example.com/a.jpg", "bottle", EntryStatus::Ready);
        let err = ManifestStore::new()
            .merge(&[entry.clone(), entry])
            .expect_err("duplicate ids must fail");
        assert!(matches!(err, BenchmarkError::Validation(_)));
    }

    #[test]
    fn merge_update_with_new_image_ref_refreshes_fingerprint() {
        let mut existing = labeled_entry("https://example.com/a.jpg", "bottle", EntryStatus::Ready);
        existing.cache_path = Some("cache/a.jpg".into());
        let store = ManifestStore::from_entries(vec![existing.clone()]).expect("store loads");

        let mut moved = labeled_entry("https://cdn.example.com/a.jpg", "bottle", EntryStatus::Labeled);
        moved.id = existing.id.clone();

        let outcome = store.merge(&[moved.clone()]).expect("merge succeeds");
        let entry = outcome.store.get(&existing.id).expect("entry present");
        assert_eq!(entry.image_ref, moved.image_ref);
        assert_eq!(entry.fingerprint, moved.fingerprint);
        assert!(entry.cache_path.is_none());
    }

    #[test]
    fn merge_refuses_labels_on_existing_synthetic_negative() {
        let negative = BenchmarkEntry::new("https://example.com/empty.jpg", EntrySource::SyntheticNegative)
            .with_status(EntryStatus::Ready);
        let store = ManifestStore::from_entries(vec![negative.clone()]).expect("store loads");

        let mut relabeled = labeled_entry("https://example.com/empty.jpg", "bottle", EntryStatus::Labeled);
        relabeled.id = negative.id.clone();

        assert!(store.merge(&[relabeled]).is_err());
    }

    #[test]
    fn repeated_merge_settles_once_status_catches_up() {
        let rows = vec![
            labeled_entry("https://example.com/a.jpg", "bottle", EntryStatus::Labeled),
            labeled_entry("https://example.com/b.jpg", "can", EntryStatus::Labeled),
        ];
        let first = ManifestStore::new().merge(&rows).expect("first merge");
        let second = first.store.merge(&rows).expect("second merge");

        assert_eq!(second.report.inserted, 0);
        assert_eq!(second.report.updated, 2);
        let third = second.store.merge(&rows).expect("third merge");
        assert_eq!(third.report.unchanged, 2);
        assert_eq!(third.store, second.store);
    }

    #[test]
    fn submitted_resolved_status_stops_at_labeled() {
        let existing = labeled_entry("https://example.com/a.jpg", "bottle", EntryStatus::Ready);
        let store = ManifestStore::from_entries(vec![existing.clone()]).expect("store loads");

        let claimed = labeled_entry("https://example.com/a.jpg", "bottle", EntryStatus::Resolved);
        let outcome = store.merge(std::slice::from_ref(&claimed)).expect("merge succeeds");
        let entry = outcome.store.get(&existing.id).expect("entry present");
        assert_eq!(entry.status, EntryStatus::Labeled);
        assert!(entry.cache_path.is_none());
        assert!(!entry.is_evaluable());

        let again = outcome.store.merge(&[claimed]).expect("merge succeeds");
        assert_eq!(again.report.unchanged, 1);
        assert_eq!(again.store, outcome.store);
    }
}
