//! Benchmark manifest store.
//!
//! The store is the only place where entry lifecycle transitions happen. Every
//! operation leaves `self` untouched and hands back a fresh store together with
//! a report, so a failed validation never leaves a half-merged manifest behind.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{BenchmarkError, CoreResult};
use crate::model::{BenchmarkEntry, BenchmarkManifest, EntryStatus, MANIFEST_VERSION};

mod dedupe;
mod merge;
mod resolve;
mod sync;

pub use dedupe::{DedupReport, DedupeOutcome, DuplicateGroup};
pub use merge::{MergeOutcome, MergeReport};
pub use resolve::{CacheLookup, ResolvedManifest, UnresolvedEntry};
pub use sync::{StatusChange, SyncOutcome, SyncReport};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestStore {
    entries: Vec<BenchmarkEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestCounts {
    pub total: usize,
    pub active: usize,
    pub removed: usize,
    pub negatives: usize,
    pub unresolved: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
}

impl ManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a manifest, enforcing unique ids and the per-entry invariants.
    pub fn from_manifest(manifest: BenchmarkManifest) -> CoreResult<Self> {
        if manifest.manifest_version > MANIFEST_VERSION {
            return Err(BenchmarkError::validation(format!(
                "unsupported manifest_version {} (max {MANIFEST_VERSION})",
                manifest.manifest_version
            )));
        }
        Self::from_entries(manifest.entries)
    }

    pub fn from_entries(entries: Vec<BenchmarkEntry>) -> CoreResult<Self> {
        ensure_unique_ids(&entries)?;
        for entry in &entries {
            entry.validate()?;
        }
        Ok(Self { entries })
    }

    pub fn to_manifest(&self) -> BenchmarkManifest {
        BenchmarkManifest {
            manifest_version: MANIFEST_VERSION,
            entries: self.entries.clone(),
        }
    }

    pub fn entries(&self) -> &[BenchmarkEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&BenchmarkEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Entries that have not been suppressed by dedupe.
    pub fn active_entries(&self) -> impl Iterator<Item = &BenchmarkEntry> {
        self.entries.iter().filter(|entry| !entry.is_removed())
    }

    pub fn counts(&self) -> ManifestCounts {
        let mut counts = ManifestCounts {
            total: self.entries.len(),
            ..ManifestCounts::default()
        };
        for status in EntryStatus::ALL {
            counts.by_status.insert(status.as_str().to_string(), 0);
        }

        for entry in &self.entries {
            if entry.is_removed() {
                counts.removed += 1;
                continue;
            }
            counts.active += 1;
            if entry.is_negative() {
                counts.negatives += 1;
            }
            if entry.unresolved {
                counts.unresolved += 1;
            }
            *counts
                .by_status
                .entry(entry.status.as_str().to_string())
                .or_default() += 1;
            *counts
                .by_source
                .entry(entry.source.as_str().to_string())
                .or_default() += 1;
        }

        counts
    }

    /// Puts a resolved entry back to `pending` so it can be relabeled.
    pub fn reopen(&self, id: &str) -> CoreResult<Self> {
        let mut entries = self.entries.clone();
        let entry = entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| BenchmarkError::validation(format!("unknown entry id: {id}")))?;

        if entry.status != EntryStatus::Resolved {
            return Err(BenchmarkError::validation(format!(
                "entry {id} is {} and only resolved entries can be reopened",
                entry.status
            )));
        }

        entry.status = EntryStatus::Pending;
        entry.cache_path = None;
        entry.unresolved = false;
        Ok(Self { entries })
    }
}

fn ensure_unique_ids(entries: &[BenchmarkEntry]) -> CoreResult<()> {
    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.id.as_str()) {
            return Err(BenchmarkError::validation(format!(
                "duplicate entry id: {}",
                entry.id
            )));
        }
    }
    Ok(())
}
