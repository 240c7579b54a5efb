pub mod audit;
pub mod compare;
pub mod dedupe;
pub mod evaluate;
pub mod merge;
pub mod plan;
pub mod reopen;
pub mod resolve;
pub mod status;
pub mod sync;

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::labeled_rows::read_labeled_rows;
use crate::manifest::ManifestStore;
use crate::model::{BenchmarkEntry, BenchmarkManifest};
use crate::taxonomy::{Taxonomy, TaxonomyFile};
use crate::util::{read_json, write_json_pretty};

pub const MANIFEST_FILENAME: &str = "benchmark_manifest.json";
pub const RESOLVED_MANIFEST_FILENAME: &str = "resolved_manifest.json";
pub const EVALUATION_FILENAME: &str = "evaluation.json";

pub fn manifest_dir(bench_root: &Path) -> PathBuf {
    bench_root.join("manifests")
}

pub fn reports_dir(bench_root: &Path) -> PathBuf {
    bench_root.join("reports")
}

pub fn runs_dir(bench_root: &Path) -> PathBuf {
    bench_root.join("runs")
}

pub fn manifest_path(bench_root: &Path, manifest_path: Option<PathBuf>) -> PathBuf {
    manifest_path.unwrap_or_else(|| manifest_dir(bench_root).join(MANIFEST_FILENAME))
}

pub fn resolved_manifest_path(bench_root: &Path, resolved_path: Option<PathBuf>) -> PathBuf {
    resolved_path.unwrap_or_else(|| manifest_dir(bench_root).join(RESOLVED_MANIFEST_FILENAME))
}

/// Loads the manifest store; a missing file is an empty benchmark.
pub fn load_store(path: &Path) -> Result<ManifestStore> {
    if !path.exists() {
        warn!(path = %path.display(), "manifest missing, starting from an empty benchmark");
        return Ok(ManifestStore::new());
    }

    let manifest: BenchmarkManifest = read_json(path)?;
    let store = ManifestStore::from_manifest(manifest)
        .with_context(|| format!("invalid manifest {}", path.display()))?;
    info!(path = %path.display(), entries = store.len(), "loaded manifest");
    Ok(store)
}

pub fn save_store(path: &Path, store: &ManifestStore) -> Result<()> {
    write_json_pretty(path, &store.to_manifest())?;
    info!(path = %path.display(), entries = store.len(), "wrote manifest");
    Ok(())
}

pub fn load_taxonomy(path: &Path) -> Result<Taxonomy> {
    let file: TaxonomyFile = read_json(path)?;
    let taxonomy = Taxonomy::from_file(file)
        .with_context(|| format!("invalid taxonomy {}", path.display()))?;
    if taxonomy.is_empty() {
        bail!("taxonomy {} defines no classes", path.display());
    }
    info!(path = %path.display(), classes = taxonomy.len(), "loaded taxonomy");
    Ok(taxonomy)
}

pub fn read_rows(path: &Path, taxonomy: Option<&Taxonomy>) -> Result<Vec<BenchmarkEntry>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let rows = read_labeled_rows(file, taxonomy)
        .with_context(|| format!("failed to read labeled rows {}", path.display()))?;
    info!(path = %path.display(), entries = rows.len(), "loaded labeled rows");
    Ok(rows)
}
