//! Wiring of configuration, collaborators and run modes
//!
//! Every configured split is evaluated in turn with its own ledger, metrics
//! file and result directories. A shutdown signal aborts the current split,
//! flushes reporting and skips the rest.

use checkpoint::CheckpointScanner;
use eval_core::{EvalConfig, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::RunMode;
use crate::collaborators::{Collaborators, MetricsSink, TokioSleeper};
use crate::layout::OutputLayout;
use crate::loader::FileCheckpointLoader;
use crate::process::ProcessEvaluator;
use crate::scheduler::{
    open_scope_ledger, CheckpointEvaluationScheduler, EvaluationScope, SchedulerSettings,
};
use crate::single::SingleCheckpointEvaluator;
use crate::sinks::{FanoutSink, JsonlMetricsSink, LogMetricsSink};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// All splits finished normally
    Completed,

    /// Aborted by a shutdown signal
    Interrupted,
}

/// Directory holding the run's log file
pub fn log_dir(config: &EvalConfig, mode: &RunMode) -> PathBuf {
    let layout = OutputLayout::new(&config.output);
    match mode {
        RunMode::Repeat => layout.repeat_eval_dir(),
        RunMode::Single(checkpoint) => {
            let split = config
                .dataset
                .splits
                .first()
                .map(String::as_str)
                .unwrap_or("test");
            layout.single_eval_dir(SingleCheckpointEvaluator::epoch_of(checkpoint).as_ref(), split)
        }
    }
}

/// Collaborators used by the `ckpt-eval` binary
///
/// The coordinator reports to `metrics_<split>.jsonl` in `eval_dir` and to
/// the log; other ranks only to the log.
pub fn default_collaborators(
    config: &EvalConfig,
    split: &str,
    eval_dir: &Path,
) -> Result<Collaborators> {
    let sink: Arc<dyn MetricsSink> = if config.distributed.is_coordinator() {
        let jsonl = JsonlMetricsSink::open(OutputLayout::metrics_path(eval_dir, split))?;
        Arc::new(FanoutSink::new(vec![
            Arc::new(jsonl),
            Arc::new(LogMetricsSink::new(split)),
        ]))
    } else {
        Arc::new(LogMetricsSink::new(split))
    };

    Ok(Collaborators {
        loader: Arc::new(FileCheckpointLoader::new(config.evaluator.settle_window)),
        evaluator: Arc::new(ProcessEvaluator::from_config(&config.evaluator)?),
        sink,
        sleeper: Arc::new(TokioSleeper),
    })
}

/// Run `mode` with the default collaborators
pub async fn run(
    config: &EvalConfig,
    mode: &RunMode,
    shutdown: impl Future<Output = ()>,
) -> Result<Outcome> {
    run_with(
        config,
        mode,
        |split, eval_dir| default_collaborators(config, split, eval_dir),
        shutdown,
    )
    .await
}

/// Run `mode`, building collaborators per split with `make`
///
/// `make` receives the split and the evaluation output directory.
pub async fn run_with<F>(
    config: &EvalConfig,
    mode: &RunMode,
    mut make: F,
    shutdown: impl Future<Output = ()>,
) -> Result<Outcome>
where
    F: FnMut(&str, &Path) -> Result<Collaborators>,
{
    tokio::pin!(shutdown);

    let layout = OutputLayout::new(&config.output);
    let settings = SchedulerSettings::from_config(config);

    match mode {
        RunMode::Repeat => {
            let eval_dir = layout.repeat_eval_dir();
            let ckpt_dir = layout.checkpoint_dir(&config.scanner);

            for split in &config.dataset.splits {
                let collaborators = make(split, &eval_dir)?;
                let sink = collaborators.sink.clone();
                let scope = EvaluationScope::new(split.clone(), eval_dir.clone());
                let ledger = open_scope_ledger(&scope.ledger_path(), settings.is_coordinator)?;
                let scanner = CheckpointScanner::new(&ckpt_dir, &config.scanner)?;
                let mut scheduler = CheckpointEvaluationScheduler::new(
                    scanner,
                    ledger,
                    scope,
                    settings.clone(),
                    collaborators,
                );

                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        abort(&*sink, settings.is_coordinator, split);
                        return Ok(Outcome::Interrupted);
                    }
                    result = scheduler.run() => {
                        result?;
                    }
                }
            }
        }
        RunMode::Single(checkpoint) => {
            let epoch = SingleCheckpointEvaluator::epoch_of(checkpoint);

            for split in &config.dataset.splits {
                let eval_dir = layout.single_eval_dir(epoch.as_ref(), split);
                let collaborators = make(split, &eval_dir)?;
                let sink = collaborators.sink.clone();
                let evaluator = SingleCheckpointEvaluator::new(
                    layout.clone(),
                    split.clone(),
                    settings.clone(),
                    collaborators,
                );

                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        abort(&*sink, settings.is_coordinator, split);
                        return Ok(Outcome::Interrupted);
                    }
                    result = evaluator.evaluate_one(checkpoint) => {
                        let metrics = result?;
                        info!(split = %split, metrics = ?metrics, "Single checkpoint evaluated");
                    }
                }
            }
        }
    }

    Ok(Outcome::Completed)
}

fn abort(sink: &dyn MetricsSink, is_coordinator: bool, split: &str) {
    warn!(split = %split, "Interrupted, in-flight evaluation is not recorded");
    if is_coordinator {
        if let Err(e) = sink.flush() {
            warn!(error = %e, "Failed to flush metrics");
        }
    }
}
