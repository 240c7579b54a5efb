use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use super::{load_store, load_taxonomy, manifest_path, read_rows, reports_dir, save_store};
use crate::cli::MergeArgs;
use crate::dedup::{SuppressedCandidate, suppress_duplicates};
use crate::manifest::{ManifestStore, MergeReport, SyncReport};
use crate::model::BenchmarkEntry;
use crate::util::{now_utc_string, write_json_pretty};

#[derive(Debug, Serialize)]
pub struct MergeRunReport {
    pub generated_at: String,
    pub rows_path: String,
    pub submitted_entries: usize,
    pub suppressed: Vec<SuppressedCandidate>,
    pub merge: MergeReport,
    pub sync: SyncReport,
}

pub fn run(args: MergeArgs) -> Result<()> {
    let manifest_path = manifest_path(&args.bench_root, args.manifest_path);
    let taxonomy = args.taxonomy.as_deref().map(load_taxonomy).transpose()?;
    let store = load_store(&manifest_path)?;
    let rows = read_rows(&args.rows, taxonomy.as_ref())?;

    let (next, report) = merge_rows(&store, rows, &args.rows)?;

    info!(
        inserted = report.merge.inserted,
        updated = report.merge.updated,
        unchanged = report.merge.unchanged,
        rejected = report.merge.rejected,
        suppressed = report.suppressed.len(),
        status_changes = report.sync.change_count,
        "merge completed"
    );
    if !report.sync.unknown_ids.is_empty() {
        warn!(count = report.sync.unknown_ids.len(), "submitted rows name unknown entries");
    }

    if args.dry_run {
        info!("merge dry-run complete");
        return Ok(());
    }

    save_store(&manifest_path, &next)?;
    let report_path = args
        .report_path
        .unwrap_or_else(|| reports_dir(&args.bench_root).join("merge_report.json"));
    write_json_pretty(&report_path, &report)?;
    info!(path = %report_path.display(), "wrote merge report");

    Ok(())
}

/// Screens duplicates, merges the admitted rows, then advances progress so the
/// freshly inserted entries catch up with their submitted status.
pub fn merge_rows(
    store: &ManifestStore,
    rows: Vec<BenchmarkEntry>,
    rows_path: &Path,
) -> Result<(ManifestStore, MergeRunReport)> {
    let submitted_entries = rows.len();
    let screened = suppress_duplicates(rows, store.entries());
    let merged = store.merge(&screened.admitted)?;
    let synced = merged.store.sync_progress(&screened.admitted);

    let report = MergeRunReport {
        generated_at: now_utc_string(),
        rows_path: PathBuf::from(rows_path).display().to_string(),
        submitted_entries,
        suppressed: screened.suppressed,
        merge: merged.report,
        sync: synced.report,
    };
    Ok((synced.store, report))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::merge_rows;
    use crate::cli::MergeArgs;
    use crate::commands::{load_store, read_rows};
    use crate::model::EntryStatus;

    const ROWS: &str = "\
image_ref,class,x1,y1,x2,y2,difficulty,source,status,id
https://example.com/a.jpg,bottle,0.1,0.1,0.5,0.5,,manual,labeled,
https://example.com/b.jpg,can,0.2,0.2,0.6,0.6,,manual,ready,
https://EXAMPLE.com/b.jpg#dup,can,0.2,0.2,0.6,0.6,,manual,ready,
";

    #[test]
    fn merge_rows_inserts_screens_and_advances_status() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let rows_path = dir.path().join("rows.csv");
        fs::write(&rows_path, ROWS).expect("rows should be written");

        let store = load_store(&dir.path().join("missing.json")).expect("empty store");
        let rows = read_rows(&rows_path, None).expect("rows should parse");
        let (next, report) = merge_rows(&store, rows, &rows_path).expect("merge should succeed");

        assert_eq!(report.submitted_entries, 3);
        assert_eq!(report.suppressed.len(), 1);
        assert_eq!(report.merge.inserted, 2);
        let statuses: Vec<EntryStatus> = next.entries().iter().map(|entry| entry.status).collect();
        assert_eq!(statuses, vec![EntryStatus::Labeled, EntryStatus::Ready]);

        let (again, second) = merge_rows(
            &next,
            read_rows(&rows_path, None).expect("rows should parse"),
            &rows_path,
        )
        .expect("merge should succeed");
        assert_eq!(second.merge.inserted, 0);
        assert_eq!(second.sync.change_count, 0);
        assert_eq!(again, next);
    }

    #[test]
    fn rows_naming_an_image_once_keep_every_label() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let rows_path = dir.path().join("rows.csv");
        fs::write(
            &rows_path,
            "\
image_ref,class,x1,y1,x2,y2,id
https://example.com/a.jpg,can,0.1,0.1,0.4,0.4,bench-1
https://example.com/a.jpg,bottle,0.5,0.5,0.9,0.9,
",
        )
        .expect("rows should be written");

        let rows = read_rows(&rows_path, None).expect("rows should parse");
        let store = load_store(&dir.path().join("missing.json")).expect("empty store");
        let (next, report) = merge_rows(&store, rows, &rows_path).expect("merge should succeed");

        assert!(report.suppressed.is_empty());
        let stored = next.get("bench-1").expect("entry should be stored under its id");
        assert_eq!(stored.expected_labels.len(), 2);
    }

    #[test]
    fn run_writes_manifest_and_report() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let rows_path = dir.path().join("rows.csv");
        fs::write(&rows_path, ROWS).expect("rows should be written");

        super::run(MergeArgs {
            bench_root: dir.path().to_path_buf(),
            manifest_path: None,
            rows: rows_path,
            taxonomy: None,
            report_path: None,
            dry_run: false,
        })
        .expect("merge command should succeed");

        let store = load_store(&dir.path().join("manifests").join("benchmark_manifest.json"))
            .expect("manifest should load");
        assert_eq!(store.len(), 2);
        assert!(dir.path().join("reports").join("merge_report.json").exists());
    }
}
