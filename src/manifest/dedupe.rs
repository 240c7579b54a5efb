use std::collections::BTreeMap;

use serde::Serialize;

use super::ManifestStore;
use crate::model::RemovalMarker;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub fingerprint: String,
    pub kept_id: String,
    pub removed_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    pub duplicate_groups: usize,
    pub removed_count: usize,
    pub groups: Vec<DuplicateGroup>,
}

impl DedupReport {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DedupeOutcome {
    pub store: ManifestStore,
    pub report: DedupReport,
}

impl ManifestStore {
    /// Collapses entries sharing a fingerprint.
    ///
    /// The keeper is the most advanced status, then the smallest id. Losers stay
    /// in the manifest marked as removed, which makes a second pass a no-op.
    pub fn dedupe(&self) -> DedupeOutcome {
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (position, entry) in self.entries.iter().enumerate() {
            if entry.is_removed() || entry.image_ref.trim().is_empty() {
                continue;
            }
            groups
                .entry(entry.fingerprint.as_str())
                .or_default()
                .push(position);
        }

        let mut entries = self.entries.clone();
        let mut report = DedupReport::default();

        for (fingerprint, members) in groups {
            if members.len() < 2 {
                continue;
            }

            let Some(keeper) = members.iter().copied().max_by(|left, right| {
                let left = &self.entries[*left];
                let right = &self.entries[*right];
                left.status
                    .cmp(&right.status)
                    .then_with(|| right.id.cmp(&left.id))
            }) else {
                continue;
            };
            let kept_id = self.entries[keeper].id.clone();

            let mut removed_ids = Vec::with_capacity(members.len() - 1);
            for position in members.into_iter().filter(|position| *position != keeper) {
                let entry = &mut entries[position];
                entry.removed = Some(RemovalMarker {
                    group: fingerprint.to_string(),
                    kept_id: kept_id.clone(),
                });
                removed_ids.push(entry.id.clone());
            }
            removed_ids.sort();

            report.removed_count += removed_ids.len();
            report.groups.push(DuplicateGroup {
                fingerprint: fingerprint.to_string(),
                kept_id,
                removed_ids,
            });
        }
        report.duplicate_groups = report.groups.len();

        DedupeOutcome {
            store: ManifestStore { entries },
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::ManifestStore;
    use super::super::test_support::labeled_entry;
    use crate::model::EntryStatus;

    fn with_id(
        id: &str,
        image_ref: &str,
        status: EntryStatus,
    ) -> crate::model::BenchmarkEntry {
        let mut entry = labeled_entry(image_ref, "bottle", status);
        entry.id = id.to_string();
        entry
    }

    #[test]
    fn dedupe_keeps_most_advanced_status() {
        let store = ManifestStore::from_entries(vec![
            with_id("e1", "https://example.com/a.jpg", EntryStatus::Ready),
            with_id("e2", "https://EXAMPLE.com/a.jpg", EntryStatus::Labeled),
            with_id("e3", "https://example.com/b.jpg", EntryStatus::Ready),
        ])
        .expect("store loads");

        let outcome = store.dedupe();
        assert_eq!(outcome.report.duplicate_groups, 1);
        assert_eq!(outcome.report.groups[0].kept_id, "e2");
        assert_eq!(outcome.report.groups[0].removed_ids, vec!["e1".to_string()]);

        let removed = outcome.store.get("e1").expect("entry retained");
        assert_eq!(
            removed.removed.as_ref().map(|marker| marker.kept_id.as_str()),
            Some("e2")
        );
        assert!(outcome.store.get("e2").is_some_and(|entry| !entry.is_removed()));
        assert!(outcome.store.get("e3").is_some_and(|entry| !entry.is_removed()));
    }

    #[test]
    fn dedupe_breaks_status_ties_by_smallest_id() {
        let store = ManifestStore::from_entries(vec![
            with_id("zeta", "https://example.com/a.jpg", EntryStatus::Labeled),
            with_id("alpha", "https://example.com/a.jpg", EntryStatus::Labeled),
            with_id("mid", "https://example.com/a.jpg", EntryStatus::Labeled),
        ])
        .expect("store loads");

        let report = store.dedupe().report;
        assert_eq!(report.groups[0].kept_id, "alpha");
        assert_eq!(
            report.groups[0].removed_ids,
            vec!["mid".to_string(), "zeta".to_string()]
        );
    }

    #[test]
    fn second_dedupe_pass_reports_nothing() {
        let store = ManifestStore::from_entries(vec![
            with_id("e1", "https://example.com/a.jpg", EntryStatus::Ready),
            with_id("e2", "https://example.com/a.jpg", EntryStatus::Pending),
        ])
        .expect("store loads");

        let first = store.dedupe();
        assert!(!first.report.is_empty());

        let second = first.store.dedupe();
        assert!(second.report.is_empty());
        assert_eq!(second.store, first.store);
    }
}
