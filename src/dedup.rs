//! Image identity for benchmark rows.
//!
//! Two rows describe the same image when their normalized image refs hash to the
//! same fingerprint. Candidates are screened here before they reach the manifest
//! store, so a re-submitted URL with a different casing or a stray fragment does
//! not create a second entry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::BenchmarkEntry;

const ENTRY_ID_PREFIX: &str = "img-";
const ENTRY_ID_HASH_CHARS: usize = 16;

pub fn normalize_image_ref(image_ref: &str) -> String {
    let trimmed = image_ref.trim();
    let lower = trimmed.to_ascii_lowercase();

    if lower.starts_with("file://") {
        let path = &trimmed["file://".len()..];
        let path = path.strip_prefix("localhost").unwrap_or(path);
        return normalize_local_path(path);
    }

    for scheme in ["http://", "https://"] {
        if lower.starts_with(scheme) {
            let rest = &trimmed[scheme.len()..];
            let rest = rest.split('#').next().unwrap_or_default();
            let (host, path) = match rest.find('/') {
                Some(index) => rest.split_at(index),
                None => (rest, ""),
            };
            let path = path.trim_end_matches('/');
            return format!("{scheme}{}{path}", host.to_ascii_lowercase());
        }
    }

    normalize_local_path(trimmed)
}

fn normalize_local_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut value = unified.as_str();
    while let Some(stripped) = value.strip_prefix("./") {
        value = stripped;
    }
    value.to_string()
}

pub fn fingerprint_image_ref(image_ref: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_image_ref(image_ref).as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn derive_entry_id(fingerprint: &str) -> String {
    let prefix: String = fingerprint.chars().take(ENTRY_ID_HASH_CHARS).collect();
    format!("{ENTRY_ID_PREFIX}{prefix}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuppressionReason {
    DuplicateOfExisting { existing_id: String },
    DuplicateInBatch { first_id: String },
    /// The id was already given to a different image earlier in the batch.
    IdConflictInBatch { first_image_ref: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressedCandidate {
    pub id: String,
    pub image_ref: String,
    pub fingerprint: String,
    pub reason: SuppressionReason,
}

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub admitted: Vec<BenchmarkEntry>,
    pub suppressed: Vec<SuppressedCandidate>,
}

/// Splits a candidate batch into rows that may enter the manifest and rows that
/// duplicate an image already present (under another id) or seen earlier in the
/// batch. A row reusing an earlier row's id for another image is suppressed as a
/// conflict. A candidate sharing both id and fingerprint with an existing entry
/// is an update, not a duplicate.
pub fn suppress_duplicates(
    candidates: Vec<BenchmarkEntry>,
    existing: &[BenchmarkEntry],
) -> DedupOutcome {
    let existing_by_fingerprint: HashMap<&str, &str> = existing
        .iter()
        .filter(|entry| !entry.is_removed())
        .map(|entry| (entry.fingerprint.as_str(), entry.id.as_str()))
        .collect();

    let mut seen_in_batch: HashMap<String, String> = HashMap::new();
    let mut image_by_id: HashMap<String, (String, String)> = HashMap::new();
    let mut outcome = DedupOutcome::default();

    for mut candidate in candidates {
        candidate.fingerprint = fingerprint_image_ref(&candidate.image_ref);

        let existing_id = existing_by_fingerprint
            .get(candidate.fingerprint.as_str())
            .filter(|existing_id| **existing_id != candidate.id)
            .map(|existing_id| existing_id.to_string());
        if let Some(existing_id) = existing_id {
            outcome.suppressed.push(SuppressedCandidate {
                id: candidate.id,
                image_ref: candidate.image_ref,
                fingerprint: candidate.fingerprint,
                reason: SuppressionReason::DuplicateOfExisting { existing_id },
            });
            continue;
        }

        let conflict = image_by_id
            .get(&candidate.id)
            .filter(|(fingerprint, _)| *fingerprint != candidate.fingerprint)
            .map(|(_, image_ref)| image_ref.clone());
        if let Some(first_image_ref) = conflict {
            outcome.suppressed.push(SuppressedCandidate {
                reason: SuppressionReason::IdConflictInBatch { first_image_ref },
                id: candidate.id,
                image_ref: candidate.image_ref,
                fingerprint: candidate.fingerprint,
            });
            continue;
        }

        if let Some(first_id) = seen_in_batch.get(&candidate.fingerprint) {
            outcome.suppressed.push(SuppressedCandidate {
                id: candidate.id,
                image_ref: candidate.image_ref,
                fingerprint: candidate.fingerprint,
                reason: SuppressionReason::DuplicateInBatch {
                    first_id: first_id.clone(),
                },
            });
            continue;
        }

        seen_in_batch.insert(candidate.fingerprint.clone(), candidate.id.clone());
        image_by_id.insert(
            candidate.id.clone(),
            (candidate.fingerprint.clone(), candidate.image_ref.clone()),
        );
        outcome.admitted.push(candidate);
    }

    outcome
}
