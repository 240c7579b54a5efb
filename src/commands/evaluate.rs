use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{EVALUATION_FILENAME, resolved_manifest_path, runs_dir};
use crate::cli::EvaluateArgs;
use crate::eval::{Evaluation, EvaluationOptions, MatchThresholds, evaluate};
use crate::manifest::ResolvedManifest;
use crate::model::PredictionsFile;
use crate::util::{now_utc_string, read_json, sha256_file, utc_compact_string, write_json_pretty};

/// Model label list, either a bare array or `{"labels": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelLabels {
    List(Vec<String>),
    Wrapped { labels: Vec<String> },
}

impl ModelLabels {
    fn into_set(self) -> BTreeSet<String> {
        let labels = match self {
            Self::List(labels) | Self::Wrapped { labels } => labels,
        };
        labels
            .into_iter()
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty())
            .collect()
    }
}

/// One evaluation run as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRun {
    pub run_id: String,
    pub generated_at: String,
    #[serde(default)]
    pub model: Option<String>,
    pub resolved_manifest_path: String,
    pub predictions_path: String,
    pub predictions_sha256: String,
    #[serde(flatten)]
    pub evaluation: Evaluation,
}

pub fn run(args: EvaluateArgs) -> Result<()> {
    let resolved_path = resolved_manifest_path(&args.bench_root, args.resolved_path.clone());
    let resolved: ResolvedManifest = read_json(&resolved_path)?;
    if args.strict {
        resolved
            .require_complete()
            .with_context(|| format!("strict evaluation of {}", resolved_path.display()))?;
    } else if !resolved.unresolved.is_empty() {
        warn!(
            count = resolved.unresolved.len(),
            "unresolved entries are excluded from metrics"
        );
    }

    let predictions: PredictionsFile = read_json(&args.predictions)?;
    let supported_classes = match &args.model_labels {
        Some(path) => Some(load_model_labels(path)?),
        None => None,
    };

    let options = EvaluationOptions {
        thresholds: MatchThresholds::new(args.iou_threshold, args.score_threshold)?,
        supported_classes,
        top_n: args.top_n,
    };
    let evaluation = evaluate(&resolved, &predictions.predictions, &options)?;

    info!(
        entries = evaluation.entries.len(),
        micro_precision = ?evaluation.metrics.micro_precision,
        micro_recall = ?evaluation.metrics.micro_recall,
        any_hit_rate = ?evaluation.metrics.any_hit_rate,
        negative_clean_rate = ?evaluation.metrics.negative_clean_rate,
        "evaluation completed"
    );
    if let Some(first) = evaluation.analysis.priority_table.first() {
        info!(
            class_id = %first.class_id,
            priority_score = first.priority_score,
            action = ?first.recommended_action,
            "top retraining priority"
        );
    }
    if !evaluation.skipped.missing_predictions.is_empty() {
        warn!(
            count = evaluation.skipped.missing_predictions.len(),
            "entries had no prediction set and were scored as empty"
        );
    }
    if !evaluation.skipped.unknown_predictions.is_empty() {
        warn!(
            count = evaluation.skipped.unknown_predictions.len(),
            "prediction sets reference entries outside the evaluable set"
        );
    }

    let run_id = args
        .run_id
        .unwrap_or_else(|| format!("eval-{}", utc_compact_string(Utc::now())));
    let out_path = args
        .out
        .unwrap_or_else(|| runs_dir(&args.bench_root).join(&run_id).join(EVALUATION_FILENAME));

    let run = EvaluationRun {
        run_id,
        generated_at: now_utc_string(),
        model: predictions.model,
        resolved_manifest_path: resolved_path.display().to_string(),
        predictions_path: args.predictions.display().to_string(),
        predictions_sha256: sha256_file(&args.predictions)?,
        evaluation,
    };
    write_json_pretty(&out_path, &run)?;
    info!(path = %out_path.display(), run_id = %run.run_id, "wrote evaluation run");

    Ok(())
}

pub fn load_model_labels(path: &Path) -> Result<BTreeSet<String>> {
    let labels: ModelLabels = read_json(path)?;
    let labels = labels.into_set();
    info!(path = %path.display(), labels = labels.len(), "loaded model labels");
    Ok(labels)
}
