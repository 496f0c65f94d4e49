//! Forest generation: enumerate every combinator expression of a fixed
//! symbol count, evaluate each to normal form (or cutoff) through the
//! parallel driver, and stream the results as newline-delimited JSON in
//! enumeration order.
//!
//! The JSONL surface is the contract consumed by the DOT/SVG tooling and
//! anything else downstream: evaluation-path lines first, then a
//! `nodeLabel` line for every referenced node id.

pub mod dot;
pub mod enumerate;
pub mod jsonl;
pub mod progress;

pub use enumerate::{count, enumerate};
pub use jsonl::{ForestLine, JsonlWriter, NodeLabelRecord, PathRecord, StepRecord};

use progress::Progress;
use skiarena_eval::{ArenaDriver, EvalConfig, EvalError, ExprOutcome};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Errors surfaced by forest generation.
#[derive(Debug, Error)]
pub enum ForestError {
    /// Bad command line or options; exit code 1.
    #[error("{0}")]
    Usage(String),
    /// Fatal runtime condition; exit code 2.
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed forest line: {0}")]
    Json(#[from] serde_json::Error),
}

impl ForestError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 1,
            _ => 2,
        }
    }
}

/// Options shared by the forest surfaces.
#[derive(Debug, Clone)]
pub struct ForestOptions {
    pub symbol_count: usize,
    pub max_steps: u32,
    pub concurrency: usize,
    /// Emit `nodeLabel` lines after the paths.
    pub labels: bool,
    /// Render a progress line on stderr.
    pub progress: bool,
}

impl ForestOptions {
    pub fn new(symbol_count: usize) -> Self {
        Self {
            symbol_count,
            max_steps: EvalConfig::forest().max_steps,
            concurrency: EvalConfig::default().n_workers,
            labels: true,
            progress: false,
        }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_labels(mut self, labels: bool) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn eval_config(&self) -> EvalConfig {
        EvalConfig::forest()
            .with_workers(self.concurrency)
            .with_max_steps(self.max_steps)
    }
}

/// Aggregate result of a forest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForestStats {
    pub expressions: u64,
    pub normal_forms: u64,
    pub diverged: u64,
}

/// Enumerates, evaluates and streams the forest for
/// `options.symbol_count` into `out`.
///
/// Paths stream as the driver finalizes them (already in enumeration
/// order); label lines follow in ascending id order once every path is
/// out. Byte-identical across runs for identical options.
pub async fn generate_forest<W: Write>(
    options: &ForestOptions,
    out: W,
) -> Result<ForestStats, ForestError> {
    if options.symbol_count == 0 {
        return Err(ForestError::Usage(
            "symbol count must be at least 1".to_string(),
        ));
    }

    let terms = enumerate(options.symbol_count);
    debug!(
        symbol_count = options.symbol_count,
        expressions = terms.len(),
        "forest enumerated"
    );

    let mut driver = ArenaDriver::new(options.eval_config())?;
    let mut writer = JsonlWriter::new(out);
    let mut progress = Progress::new(count(options.symbol_count as u32), options.progress);
    let mut referenced: BTreeSet<u32> = BTreeSet::new();
    let mut stats = ForestStats::default();

    let (tx, mut rx) = mpsc::channel(64);
    let (run, written) = tokio::join!(
        driver.run_forest(&terms, tx),
        async {
            while let Some(path) = rx.recv().await {
                let record = PathRecord::from(&path);
                if options.labels {
                    referenced.insert(record.source);
                    referenced.insert(record.sink);
                    for step in &record.steps {
                        referenced.insert(step.from);
                        referenced.insert(step.to);
                    }
                }
                stats.expressions += 1;
                match path.outcome {
                    ExprOutcome::Completed => stats.normal_forms += 1,
                    ExprOutcome::Diverged | ExprOutcome::Failed => stats.diverged += 1,
                }
                writer.write_path(&record)?;
                progress.tick();
            }
            Ok::<(), ForestError>(())
        }
    );
    run?;
    written?;

    if options.labels {
        for id in referenced {
            let label = driver.render(id)?;
            writer.write_label(&NodeLabelRecord::new(id, label))?;
        }
    }
    progress.finish();
    writer.flush()?;
    Ok(stats)
}

/// Runs the forest in memory and returns the parsed records plus the
/// label table, the shape the DOT writer consumes.
pub async fn collect_records(
    options: &ForestOptions,
) -> Result<(Vec<PathRecord>, BTreeMap<u32, String>), ForestError> {
    let mut buffer = Vec::new();
    generate_forest(options, &mut buffer).await?;

    let text = String::from_utf8(buffer)
        .map_err(|e| ForestError::Usage(format!("forest output was not UTF-8: {e}")))?;
    let mut paths = Vec::new();
    let mut labels = BTreeMap::new();
    for line in text.lines() {
        match jsonl::parse_line(line)? {
            ForestLine::Path(path) => paths.push(path),
            ForestLine::NodeLabel(label) => {
                labels.insert(label.id, label.label);
            }
            ForestLine::Unknown => {}
        }
    }
    Ok((paths, labels))
}
