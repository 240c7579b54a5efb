use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ManifestStore;
use crate::error::{BenchmarkError, CoreResult};
use crate::model::{BenchmarkEntry, BenchmarkManifest, EntryStatus, MANIFEST_VERSION};

/// Maps an image ref to a locally cached file.
///
/// Implementations own every download, copy and timeout; the store only asks.
pub trait CacheLookup {
    fn lookup(&self, image_ref: &str) -> Option<PathBuf>;
}

impl<F> CacheLookup for F
where
    F: Fn(&str) -> Option<PathBuf>,
{
    fn lookup(&self, image_ref: &str) -> Option<PathBuf> {
        self(image_ref)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedEntry {
    pub id: String,
    pub image_ref: String,
    pub status: EntryStatus,
}

/// Manifest snapshot after cache resolution. Carries no timestamps so the same
/// manifest and cache state always serialize to the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedManifest {
    pub manifest_version: u32,
    pub resolved_count: usize,
    pub skipped_count: usize,
    pub entries: Vec<BenchmarkEntry>,
    pub unresolved: Vec<UnresolvedEntry>,
}

impl ResolvedManifest {
    pub fn evaluable_entries(&self) -> impl Iterator<Item = &BenchmarkEntry> {
        self.entries.iter().filter(|entry| entry.is_evaluable())
    }

    pub fn unresolved_errors(&self) -> Vec<BenchmarkError> {
        self.unresolved
            .iter()
            .map(|entry| BenchmarkError::UnresolvedReference {
                entry_id: entry.id.clone(),
                image_ref: entry.image_ref.clone(),
            })
            .collect()
    }

    /// Fails on the first entry that could not be attached to a cached image.
    pub fn require_complete(&self) -> CoreResult<()> {
        match self.unresolved_errors().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn to_manifest(&self) -> BenchmarkManifest {
        BenchmarkManifest {
            manifest_version: self.manifest_version,
            entries: self.entries.clone(),
        }
    }
}

impl ManifestStore {
    /// Attaches cached image paths to every labeled entry.
    ///
    /// Entries at `labeled` or later that the lookup resolves become `resolved`.
    /// The rest of that group is flagged `unresolved` and keeps its status.
    /// Entries still being labeled and entries removed by dedupe pass through.
    pub fn resolve(&self, cache: &dyn CacheLookup) -> ResolvedManifest {
        let mut entries = Vec::with_capacity(self.entries.len());
        let mut unresolved = Vec::new();
        let mut resolved_count = 0;
        let mut skipped_count = 0;

        for entry in &self.entries {
            let mut next = entry.clone();
            if entry.is_removed() || entry.status < EntryStatus::Labeled {
                skipped_count += 1;
                entries.push(next);
                continue;
            }

            let image_ref = entry.image_ref.trim();
            let cached = if image_ref.is_empty() {
                None
            } else {
                cache.lookup(image_ref)
            };

            match cached {
                Some(path) => {
                    next.cache_path = Some(path);
                    next.status = EntryStatus::Resolved;
                    next.unresolved = false;
                    resolved_count += 1;
                }
                None => {
                    next.cache_path = None;
                    next.unresolved = true;
                    unresolved.push(UnresolvedEntry {
                        id: entry.id.clone(),
                        image_ref: entry.image_ref.clone(),
                        status: entry.status,
                    });
                }
            }
            entries.push(next);
        }

        ResolvedManifest {
            manifest_version: MANIFEST_VERSION,
            resolved_count,
            skipped_count,
            entries,
            unresolved,
        }
    }
}
