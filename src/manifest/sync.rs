use std::collections::HashMap;

use serde::Serialize;

use super::ManifestStore;
use crate::model::{BenchmarkEntry, EntryStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub id: String,
    pub from: EntryStatus,
    pub to: EntryStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub change_count: usize,
    pub changes: Vec<StatusChange>,
    pub unknown_ids: Vec<String>,
    pub skipped_missing_image: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub store: ManifestStore,
    pub report: SyncReport,
}

impl ManifestStore {
    /// Advances labeling progress.
    ///
    /// Submitted rows move their entry forward to the submitted status (capped at
    /// `labeled`; only resolution produces `resolved`) when that is strictly
    /// later and the entry has an image. Afterwards every pending entry with an
    /// image becomes `ready`. Transitions never go backwards.
    pub fn sync_progress(&self, submitted: &[BenchmarkEntry]) -> SyncOutcome {
        let mut entries = self.entries.clone();
        let index: HashMap<&str, usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.id.as_str(), position))
            .collect();
        let mut report = SyncReport::default();

        for row in submitted {
            let Some(position) = index.get(row.id.as_str()).copied() else {
                report.unknown_ids.push(row.id.clone());
                continue;
            };

            let entry = &mut entries[position];
            if entry.is_removed() {
                continue;
            }
            if entry.image_ref.trim().is_empty() {
                report.skipped_missing_image.push(entry.id.clone());
                continue;
            }

            let target = row.status.min(EntryStatus::Labeled);
            if target > entry.status {
                report.changes.push(StatusChange {
                    id: entry.id.clone(),
                    from: entry.status,
                    to: target,
                });
                entry.status = target;
            }
        }

        for entry in entries.iter_mut() {
            if entry.is_removed() || entry.status != EntryStatus::Pending {
                continue;
            }
            if entry.image_ref.trim().is_empty() {
                continue;
            }
            report.changes.push(StatusChange {
                id: entry.id.clone(),
                from: EntryStatus::Pending,
                to: EntryStatus::Ready,
            });
            entry.status = EntryStatus::Ready;
        }

        report.change_count = report.changes.len();
        SyncOutcome {
            store: ManifestStore { entries },
            report,
        }
    }
}
