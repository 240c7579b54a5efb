use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use super::{load_store, load_taxonomy, manifest_path, reports_dir};
use crate::audit::{AuditOptions, AuditReport, CheckResult, audit_dataset};
use crate::cli::AuditArgs;
use crate::util::{now_utc_string, write_json_pretty};

#[derive(Debug, Serialize)]
struct AuditRun {
    generated_at: String,
    taxonomy_path: String,
    manifest_path: String,
    #[serde(flatten)]
    report: AuditReport,
}

pub fn run(args: AuditArgs) -> Result<()> {
    let taxonomy = load_taxonomy(&args.taxonomy)?;
    let manifest_path = manifest_path(&args.bench_root, args.manifest_path);
    let store = load_store(&manifest_path)?;

    let report = audit_dataset(
        &taxonomy,
        &store,
        AuditOptions {
            leaves_only: args.leaves_only,
        },
    );

    for check in &report.checks {
        if check.result == CheckResult::Failed {
            warn!(check_id = %check.check_id, name = %check.name, "audit check failed");
        }
    }
    info!(
        status = %report.status,
        passed = report.summary.passed,
        failed = report.summary.failed,
        pending = report.summary.pending,
        missing_labeled_classes = report.gaps.missing_in_labeled_entries.len(),
        unknown_classes = report.gaps.unknown_manifest_classes.len(),
        "audit completed"
    );

    let passed = report.passed();
    let report_path = args
        .report_path
        .unwrap_or_else(|| reports_dir(&args.bench_root).join("audit_report.json"));
    write_json_pretty(
        &report_path,
        &AuditRun {
            generated_at: now_utc_string(),
            taxonomy_path: args.taxonomy.display().to_string(),
            manifest_path: manifest_path.display().to_string(),
            report,
        },
    )?;
    info!(path = %report_path.display(), "wrote audit report");

    if args.strict && !passed {
        bail!("dataset audit failed; see {}", report_path.display());
    }

    Ok(())
}
