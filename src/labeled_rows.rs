//! Labeling submissions in tabular form.
//!
//! One CSV row per ground-truth box:
//! `image_ref,class,x1,y1,x2,y2,difficulty,source,status,id`. A row with an
//! empty `class` declares the image a negative. Rows for the same image fold
//! into one entry, in the order the images first appear. An explicit `id` on
//! any of an image's rows names the whole entry.

use std::collections::{HashMap, HashSet};
use std::io::Read;

use serde::Deserialize;

use crate::error::{BenchmarkError, CoreResult};
use crate::model::{
    BenchmarkEntry, BoundingBox, Difficulty, EntrySource, EntryStatus, ExpectedLabel,
};
use crate::taxonomy::Taxonomy;

#[derive(Debug, Deserialize)]
struct LabeledRow {
    image_ref: String,
    #[serde(default)]
    class: String,
    #[serde(default)]
    x1: Option<f64>,
    #[serde(default)]
    y1: Option<f64>,
    #[serde(default)]
    x2: Option<f64>,
    #[serde(default)]
    y2: Option<f64>,
    #[serde(default)]
    difficulty: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    id: String,
}

struct PendingEntry {
    entry: BenchmarkEntry,
    explicit_id: Option<String>,
    declared_negative: bool,
}

pub fn read_labeled_rows<R: Read>(
    reader: R,
    taxonomy: Option<&Taxonomy>,
) -> CoreResult<Vec<BenchmarkEntry>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut pending: Vec<PendingEntry> = Vec::new();
    let mut by_fingerprint: HashMap<String, usize> = HashMap::new();
    let mut id_owner: HashMap<String, usize> = HashMap::new();

    for (position, record) in csv_reader.deserialize::<LabeledRow>().enumerate() {
        // Header is line 1.
        let line = position + 2;
        let row = record
            .map_err(|err| BenchmarkError::validation(format!("labeled rows line {line}: {err}")))?;
        if row.image_ref.is_empty() {
            return Err(BenchmarkError::validation(format!(
                "labeled rows line {line}: image_ref is empty"
            )));
        }

        let source = parse_or_default(&row.source, EntrySource::Manual, EntrySource::parse)
            .ok_or_else(|| {
                BenchmarkError::validation(format!(
                    "labeled rows line {line}: unknown source '{}'",
                    row.source
                ))
            })?;
        let status = parse_or_default(&row.status, EntryStatus::Labeled, EntryStatus::parse)
            .ok_or_else(|| {
                BenchmarkError::validation(format!(
                    "labeled rows line {line}: unknown status '{}'",
                    row.status
                ))
            })?;

        let fresh = BenchmarkEntry::new(&row.image_ref, source).with_status(status);
        let position = match by_fingerprint.get(&fresh.fingerprint) {
            Some(position) => *position,
            None => {
                by_fingerprint.insert(fresh.fingerprint.clone(), pending.len());
                pending.push(PendingEntry {
                    entry: fresh,
                    explicit_id: None,
                    declared_negative: false,
                });
                pending.len() - 1
            }
        };

        if !row.id.is_empty() {
            if let Some(owner) = id_owner.get(&row.id).filter(|owner| **owner != position) {
                return Err(BenchmarkError::validation(format!(
                    "labeled rows line {line}: entry {} already uses image {}",
                    row.id, pending[*owner].entry.image_ref
                )));
            }
            let slot = &mut pending[position];
            match slot.explicit_id.clone() {
                Some(existing) if existing != row.id => {
                    return Err(BenchmarkError::validation(format!(
                        "labeled rows line {line}: image {} is already named {existing}, not {}",
                        slot.entry.image_ref, row.id
                    )));
                }
                Some(_) => {}
                None => {
                    slot.explicit_id = Some(row.id.clone());
                    slot.entry.id = row.id.clone();
                    id_owner.insert(row.id.clone(), position);
                }
            }
        }

        let slot = &mut pending[position];
        slot.entry.status = slot.entry.status.max(status);

        if row.class.is_empty() {
            slot.declared_negative = true;
        } else {
            let label = parse_label(&row, line, taxonomy)?;
            slot.entry.expected_labels.push(label);
        }
        if slot.declared_negative && !slot.entry.expected_labels.is_empty() {
            return Err(BenchmarkError::validation(format!(
                "labeled rows line {line}: entry {} is declared negative but has labels",
                slot.entry.id
            )));
        }
    }

    let entries: Vec<BenchmarkEntry> = pending.into_iter().map(|slot| slot.entry).collect();
    let mut ids = HashSet::with_capacity(entries.len());
    for entry in &entries {
        if !ids.insert(entry.id.as_str()) {
            return Err(BenchmarkError::validation(format!(
                "labeled rows: id {} names two different images",
                entry.id
            )));
        }
        entry.validate()?;
    }
    Ok(entries)
}

fn parse_or_default<T>(value: &str, default: T, parse: fn(&str) -> Option<T>) -> Option<T> {
    if value.is_empty() {
        Some(default)
    } else {
        parse(value)
    }
}

fn parse_label(row: &LabeledRow, line: usize, taxonomy: Option<&Taxonomy>) -> CoreResult<ExpectedLabel> {
    let class_id = match taxonomy {
        Some(taxonomy) => taxonomy
            .resolve_label(&row.class)
            .map(str::to_string)
            .ok_or_else(|| {
                BenchmarkError::validation(format!(
                    "labeled rows line {line}: unknown class label '{}'",
                    row.class
                ))
            })?,
        None => row.class.clone(),
    };

    let (Some(x1), Some(y1), Some(x2), Some(y2)) = (row.x1, row.y1, row.x2, row.y2) else {
        return Err(BenchmarkError::validation(format!(
            "labeled rows line {line}: class '{}' needs all four box coordinates",
            row.class
        )));
    };

    let difficulty = parse_or_default(&row.difficulty, Difficulty::Normal, Difficulty::parse)
        .ok_or_else(|| {
            BenchmarkError::validation(format!(
                "labeled rows line {line}: unknown difficulty '{}'",
                row.difficulty
            ))
        })?;

    Ok(ExpectedLabel {
        class_id,
        bbox: BoundingBox::new(x1, y1, x2, y2),
        difficulty,
    })
}
