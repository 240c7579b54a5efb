use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::evaluate::EvaluationRun;
use super::{EVALUATION_FILENAME, load_store, manifest_path, resolved_manifest_path, runs_dir};
use crate::cli::StatusArgs;
use crate::manifest::ResolvedManifest;
use crate::util::read_json;

pub fn run(args: StatusArgs) -> Result<()> {
    let manifest_path = manifest_path(&args.bench_root, None);
    let resolved_path = resolved_manifest_path(&args.bench_root, None);

    info!(bench_root = %args.bench_root.display(), "status requested");

    if manifest_path.exists() {
        let store = load_store(&manifest_path)?;
        if store.is_empty() {
            warn!(path = %manifest_path.display(), "manifest has no entries");
        }
        let counts = store.counts();
        info!(
            total = counts.total,
            active = counts.active,
            removed = counts.removed,
            negatives = counts.negatives,
            unresolved = counts.unresolved,
            by_status = ?counts.by_status,
            by_source = ?counts.by_source,
            "manifest status"
        );
    } else {
        warn!(path = %manifest_path.display(), "manifest missing");
    }

    if resolved_path.exists() {
        let resolved: ResolvedManifest = read_json(&resolved_path)?;
        info!(
            resolved = resolved.resolved_count,
            unresolved = resolved.unresolved.len(),
            evaluable = resolved.evaluable_entries().count(),
            "resolved manifest status"
        );
    } else {
        warn!(path = %resolved_path.display(), "resolved manifest missing");
    }

    match latest_run(&runs_dir(&args.bench_root))? {
        Some(path) => {
            let run: EvaluationRun = read_json(&path)?;
            info!(
                run_id = %run.run_id,
                generated_at = %run.generated_at,
                model = %run.model.unwrap_or_default(),
                micro_precision = ?run.evaluation.metrics.micro_precision,
                micro_recall = ?run.evaluation.metrics.micro_recall,
                any_hit_rate = ?run.evaluation.metrics.any_hit_rate,
                negative_clean_rate = ?run.evaluation.metrics.negative_clean_rate,
                "latest evaluation run"
            );
        }
        None => warn!("no evaluation runs found"),
    }

    Ok(())
}

/// Run directories are named with a compact UTC timestamp by default, so the
/// lexicographically last one with an evaluation file is the newest.
fn latest_run(runs_dir: &Path) -> Result<Option<PathBuf>> {
    if !runs_dir.is_dir() {
        return Ok(None);
    }

    let mut candidates = Vec::new();
    let entries =
        fs::read_dir(runs_dir).with_context(|| format!("failed to read {}", runs_dir.display()))?;
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", runs_dir.display()))?;
        let path = entry.path().join(EVALUATION_FILENAME);
        if path.is_file() {
            candidates.push(path);
        }
    }

    candidates.sort();
    Ok(candidates.pop())
}
