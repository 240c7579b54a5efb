use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::eval::{DEFAULT_IOU_THRESHOLD, DEFAULT_SCORE_THRESHOLD, DEFAULT_TOP_N};
use crate::model::EntryStatus;

#[derive(Parser, Debug)]
#[command(
    name = "benchkit",
    version,
    about = "Detector benchmark manifest, evaluation and coverage planning"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Merge(MergeArgs),
    Dedupe(DedupeArgs),
    Sync(SyncArgs),
    Resolve(ResolveArgs),
    Reopen(ReopenArgs),
    Evaluate(EvaluateArgs),
    Compare(CompareArgs),
    Plan(PlanArgs),
    Audit(AuditArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct MergeArgs {
    #[arg(long, default_value = ".cache/benchkit")]
    pub bench_root: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    /// Labeled rows CSV.
    #[arg(long)]
    pub rows: PathBuf,

    #[arg(long)]
    pub taxonomy: Option<PathBuf>,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DedupeArgs {
    #[arg(long, default_value = ".cache/benchkit")]
    pub bench_root: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    #[arg(long, default_value = ".cache/benchkit")]
    pub bench_root: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long)]
    pub rows: Option<PathBuf>,

    #[arg(long)]
    pub taxonomy: Option<PathBuf>,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ResolveArgs {
    #[arg(long, default_value = ".cache/benchkit")]
    pub bench_root: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    #[arg(long)]
    pub resolved_path: Option<PathBuf>,

    /// Copy local images into the cache directory instead of pointing at them.
    #[arg(long, default_value_t = false)]
    pub copy_local: bool,

    #[arg(long, default_value_t = false)]
    pub strict: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ReopenArgs {
    #[arg(long, default_value = ".cache/benchkit")]
    pub bench_root: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long = "id", required = true)]
    pub ids: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[arg(long, default_value = ".cache/benchkit")]
    pub bench_root: PathBuf,

    #[arg(long)]
    pub resolved_path: Option<PathBuf>,

    #[arg(long)]
    pub predictions: PathBuf,

    /// JSON list of class ids the model can emit.
    #[arg(long)]
    pub model_labels: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_IOU_THRESHOLD)]
    pub iou_threshold: f64,

    #[arg(long, default_value_t = DEFAULT_SCORE_THRESHOLD)]
    pub score_threshold: f64,

    #[arg(long, default_value_t = DEFAULT_TOP_N)]
    pub top_n: usize,

    #[arg(long)]
    pub run_id: Option<String>,

    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Fail when the resolved manifest still lists unresolved entries.
    #[arg(long, default_value_t = false)]
    pub strict: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    #[arg(long, default_value = ".cache/benchkit")]
    pub bench_root: PathBuf,

    #[arg(long)]
    pub baseline: PathBuf,

    #[arg(long)]
    pub candidate: PathBuf,

    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[arg(long, default_value = ".cache/benchkit")]
    pub bench_root: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long)]
    pub taxonomy: PathBuf,

    /// Suggested images as `{"candidates": [...]}`.
    #[arg(long)]
    pub candidates: Option<PathBuf>,

    #[arg(long)]
    pub planner_config: Option<PathBuf>,

    #[arg(long)]
    pub target: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub max_selected: Option<usize>,

    #[arg(long)]
    pub negative_target: Option<usize>,

    #[arg(long, value_enum)]
    pub min_status: Option<StatusFilter>,

    #[arg(long, default_value_t = false)]
    pub leaves_only: bool,

    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusFilter {
    Pending,
    Ready,
    Labeled,
    Resolved,
}

impl StatusFilter {
    pub fn as_status(self) -> EntryStatus {
        match self {
            Self::Pending => EntryStatus::Pending,
            Self::Ready => EntryStatus::Ready,
            Self::Labeled => EntryStatus::Labeled,
            Self::Resolved => EntryStatus::Resolved,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct AuditArgs {
    #[arg(long, default_value = ".cache/benchkit")]
    pub bench_root: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long)]
    pub taxonomy: PathBuf,

    #[arg(long, default_value_t = false)]
    pub leaves_only: bool,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    /// Exit non-zero when any check fails.
    #[arg(long, default_value_t = false)]
    pub strict: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/benchkit")]
    pub bench_root: PathBuf,
}
