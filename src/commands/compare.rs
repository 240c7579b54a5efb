use anyhow::Result;
use serde::Serialize;
use tracing::info;

use super::evaluate::EvaluationRun;
use super::reports_dir;
use crate::cli::CompareArgs;
use crate::eval::{ComparisonReport, compare};
use crate::util::{now_utc_string, read_json, write_json_pretty};

#[derive(Debug, Serialize)]
struct ComparisonRun {
    generated_at: String,
    baseline_run_id: String,
    candidate_run_id: String,
    baseline_path: String,
    candidate_path: String,
    #[serde(flatten)]
    report: ComparisonReport,
}

pub fn run(args: CompareArgs) -> Result<()> {
    let baseline: EvaluationRun = read_json(&args.baseline)?;
    let candidate: EvaluationRun = read_json(&args.candidate)?;

    let report = compare(&baseline.evaluation, &candidate.evaluation);
    info!(
        baseline = %baseline.run_id,
        candidate = %candidate.run_id,
        improved = report.counts.improved,
        regressed = report.counts.regressed,
        unchanged_hit = report.counts.unchanged_hit,
        unchanged_miss = report.counts.unchanged_miss,
        new_entries = report.counts.new_entry,
        removed_entries = report.counts.removed_entry,
        "comparison completed"
    );

    let out_path = args.out.unwrap_or_else(|| {
        reports_dir(&args.bench_root).join(format!(
            "compare_{}_vs_{}.json",
            baseline.run_id, candidate.run_id
        ))
    });
    write_json_pretty(
        &out_path,
        &ComparisonRun {
            generated_at: now_utc_string(),
            baseline_run_id: baseline.run_id,
            candidate_run_id: candidate.run_id,
            baseline_path: args.baseline.display().to_string(),
            candidate_path: args.candidate.display().to_string(),
            report,
        },
    )?;
    info!(path = %out_path.display(), "wrote comparison report");

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use crate::cli::CompareArgs;
    use crate::commands::evaluate::EvaluationRun;
    use crate::eval::{EvaluationOptions, evaluate};
    use crate::manifest::ManifestStore;
    use crate::manifest::test_support::labeled_entry;
    use crate::model::{BoundingBox, Detection, EntryStatus, PredictionSet};
    use crate::util::write_json_pretty;

    fn write_run(path: &Path, run_id: &str, predictions: &[PredictionSet]) {
        let entry = labeled_entry("https://example.com/a.jpg", "bottle", EntryStatus::Labeled);
        let resolved = ManifestStore::from_entries(vec![entry])
            .expect("store loads")
            .resolve(&|_: &str| Some(PathBuf::from("images/a.jpg")));
        let evaluation = evaluate(&resolved, predictions, &EvaluationOptions::default())
            .expect("evaluation succeeds");
        let run = EvaluationRun {
            run_id: run_id.to_string(),
            generated_at: "2026-01-01T00:00:00Z".to_string(),
            model: None,
            resolved_manifest_path: "resolved.json".to_string(),
            predictions_path: "predictions.json".to_string(),
            predictions_sha256: String::new(),
            evaluation,
        };
        write_json_pretty(path, &run).expect("run should be written");
    }

    #[test]
    fn run_writes_named_report_with_improvement() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let entry = labeled_entry("https://example.com/a.jpg", "bottle", EntryStatus::Labeled);
        let hit = PredictionSet {
            entry_id: entry.id.clone(),
            detections: vec![Detection {
                class_id: "bottle".to_string(),
                bbox: BoundingBox::new(0.1, 0.1, 0.5, 0.5),
                score: 0.9,
            }],
        };
        let baseline = dir.path().join("baseline.json");
        let candidate = dir.path().join("candidate.json");
        write_run(&baseline, "base", &[]);
        write_run(&candidate, "next", &[hit]);

        super::run(CompareArgs {
            bench_root: dir.path().to_path_buf(),
            baseline,
            candidate,
            out: None,
        })
        .expect("compare should succeed");

        let text = fs::read_to_string(dir.path().join("reports").join("compare_base_vs_next.json"))
            .expect("report should be written");
        let report: serde_json::Value = serde_json::from_str(&text).expect("report should parse");
        assert_eq!(report["baseline_run_id"], "base");
        assert_eq!(report["counts"]["improved"], 1);
        assert_eq!(report["counts"]["regressed"], 0);
    }
}
