use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use super::{load_store, load_taxonomy, manifest_path, read_rows, reports_dir, save_store};
use crate::cli::SyncArgs;
use crate::manifest::SyncReport;
use crate::util::{now_utc_string, write_json_pretty};

#[derive(Debug, Serialize)]
struct SyncRunReport {
    generated_at: String,
    rows_path: Option<String>,
    #[serde(flatten)]
    report: SyncReport,
}

pub fn run(args: SyncArgs) -> Result<()> {
    let manifest_path = manifest_path(&args.bench_root, args.manifest_path);
    let store = load_store(&manifest_path)?;

    let taxonomy = args.taxonomy.as_deref().map(load_taxonomy).transpose()?;
    let submitted = match &args.rows {
        Some(path) => read_rows(path, taxonomy.as_ref())?,
        None => Vec::new(),
    };

    let outcome = store.sync_progress(&submitted);
    info!(
        submitted = submitted.len(),
        changes = outcome.report.change_count,
        "progress sync completed"
    );
    if !outcome.report.unknown_ids.is_empty() {
        warn!(
            count = outcome.report.unknown_ids.len(),
            "submitted rows name entries missing from the manifest; run merge first"
        );
    }
    if !outcome.report.skipped_missing_image.is_empty() {
        warn!(
            count = outcome.report.skipped_missing_image.len(),
            "submitted entries have no image ref"
        );
    }

    if args.dry_run {
        info!("sync dry-run complete");
        return Ok(());
    }

    save_store(&manifest_path, &outcome.store)?;
    let report_path = args
        .report_path
        .unwrap_or_else(|| reports_dir(&args.bench_root).join("sync_report.json"));
    write_json_pretty(
        &report_path,
        &SyncRunReport {
            generated_at: now_utc_string(),
            rows_path: args.rows.as_ref().map(|path| path.display().to_string()),
            report: outcome.report,
        },
    )?;
    info!(path = %report_path.display(), "wrote sync report");

    Ok(())
}
