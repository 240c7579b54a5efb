use anyhow::Result;
use serde::Serialize;
use tracing::info;

use super::{load_store, load_taxonomy, manifest_path, reports_dir};
use crate::cli::PlanArgs;
use crate::plan::{CandidateFile, CoveragePlan, PlannerConfig, plan_coverage};
use crate::util::{now_utc_string, read_json, write_json_pretty};

#[derive(Debug, Serialize)]
struct PlanRun {
    generated_at: String,
    config: PlannerConfig,
    total_deficit: usize,
    #[serde(flatten)]
    plan: CoveragePlan,
}

pub fn run(args: PlanArgs) -> Result<()> {
    let taxonomy = load_taxonomy(&args.taxonomy)?;
    let manifest_path = manifest_path(&args.bench_root, args.manifest_path.clone());
    let store = load_store(&manifest_path)?;
    let config = planner_config(&args)?;

    let candidates = match &args.candidates {
        Some(path) => read_json::<CandidateFile>(path)?.candidates,
        None => Vec::new(),
    };

    let plan = plan_coverage(&taxonomy, &store, &candidates, &config)?;
    info!(
        classes = plan.classes.len(),
        queued = plan.queue.len(),
        selected = plan.selected.len(),
        batches = plan.batches.len(),
        skipped_duplicates = plan.skipped_duplicates.len(),
        without_candidates = plan.classes_without_candidates.len(),
        negative_deficit = plan.negatives.deficit,
        "coverage plan built"
    );

    let out_path = args
        .out
        .clone()
        .unwrap_or_else(|| reports_dir(&args.bench_root).join("coverage_plan.json"));
    write_json_pretty(
        &out_path,
        &PlanRun {
            generated_at: now_utc_string(),
            total_deficit: plan.total_deficit(),
            config,
            plan,
        },
    )?;
    info!(path = %out_path.display(), "wrote coverage plan");

    Ok(())
}

/// Config file first, then CLI flags on top.
fn planner_config(args: &PlanArgs) -> Result<PlannerConfig> {
    let mut config = match &args.planner_config {
        Some(path) => read_json::<PlannerConfig>(path)?,
        None => PlannerConfig::default(),
    };

    if let Some(target) = args.target {
        config.default_target = target;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if args.max_selected.is_some() {
        config.max_selected = args.max_selected;
    }
    if let Some(negative_target) = args.negative_target {
        config.negative_target = negative_target;
    }
    if let Some(min_status) = args.min_status {
        config.min_status = min_status.as_status();
    }
    if args.leaves_only {
        config.leaves_only = true;
    }

    config.validate()?;
    Ok(config)
}
