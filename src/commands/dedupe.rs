use anyhow::Result;
use serde::Serialize;
use tracing::info;

use super::{load_store, manifest_path, reports_dir, save_store};
use crate::cli::DedupeArgs;
use crate::manifest::DedupReport;
use crate::util::{now_utc_string, write_json_pretty};

#[derive(Debug, Serialize)]
struct DedupeRunReport {
    generated_at: String,
    manifest_path: String,
    #[serde(flatten)]
    report: DedupReport,
}

pub fn run(args: DedupeArgs) -> Result<()> {
    let manifest_path = manifest_path(&args.bench_root, args.manifest_path);
    let store = load_store(&manifest_path)?;

    let outcome = store.dedupe();
    info!(
        groups = outcome.report.duplicate_groups,
        removed = outcome.report.removed_count,
        "dedupe completed"
    );

    if args.dry_run {
        info!("dedupe dry-run complete");
        return Ok(());
    }

    if !outcome.report.is_empty() {
        save_store(&manifest_path, &outcome.store)?;
    }

    let report_path = args
        .report_path
        .unwrap_or_else(|| reports_dir(&args.bench_root).join("dedupe_report.json"));
    write_json_pretty(
        &report_path,
        &DedupeRunReport {
            generated_at: now_utc_string(),
            manifest_path: manifest_path.display().to_string(),
            report: outcome.report,
        },
    )?;
    info!(path = %report_path.display(), "wrote dedupe report");

    Ok(())
}
