//! Interfaces to the collaborators the scheduler drives
//!
//! Weight loading, metric computation and reporting live outside the
//! scheduler. The traits here are the whole contract; implementations are
//! in [`crate::loader`], [`crate::process`] and [`crate::sinks`].

use async_trait::async_trait;
use eval_core::{EpochId, MetricMap, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// How a checkpoint should be loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOptions {
    /// Map weights to host memory (distributed evaluation)
    pub to_cpu: bool,

    /// Also load the task head
    pub load_head: bool,
}

/// Handle to a loaded checkpoint
#[derive(Debug, Clone)]
pub struct LoadedModel {
    /// Checkpoint the weights came from
    pub checkpoint: PathBuf,

    /// Size of the checkpoint file in bytes
    pub size_bytes: u64,

    /// Options the checkpoint was loaded with
    pub options: LoadOptions,
}

/// Loads checkpoint weights into a model
///
/// Failures are reported as [`eval_core::Error::CheckpointLoad`] and are
/// never retried by the caller.
#[async_trait]
pub trait CheckpointLoader: Send + Sync {
    /// Load the checkpoint at `path`
    async fn load(&self, path: &Path, options: LoadOptions) -> Result<LoadedModel>;
}

/// One evaluation run
#[derive(Debug, Clone, Copy)]
pub struct EvalRequest<'a> {
    /// Loaded weights
    pub model: &'a LoadedModel,

    /// Dataset split to evaluate on
    pub split: &'a str,

    /// Epoch of the checkpoint, if its name carries one
    pub epoch: Option<&'a EpochId>,

    /// Directory for evaluation artifacts
    pub output_dir: &'a Path,

    /// Keep per-sample results on disk
    pub save_to_file: bool,
}

impl EvalRequest<'_> {
    /// Epoch label used in logs and directory names
    pub fn epoch_label(&self) -> String {
        self.epoch
            .map(ToString::to_string)
            .unwrap_or_else(|| "no_number".to_string())
    }
}

/// Runs a model over the held-out dataset
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Evaluate to completion, returning metric name to value
    async fn run(&self, request: EvalRequest<'_>) -> Result<MetricMap>;
}

/// Receives metric values keyed by epoch
///
/// Errors are logged by the caller and never abort a run.
pub trait MetricsSink: Send + Sync {
    /// Report one metric value
    fn emit(&self, metric: &str, value: f64, epoch: &EpochId) -> Result<()>;

    /// Push buffered values to their destination
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Time source for idle waits and retry backoff
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeping
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Everything the scheduler calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub loader: Arc<dyn CheckpointLoader>,
    pub evaluator: Arc<dyn Evaluator>,
    pub sink: Arc<dyn MetricsSink>,
    pub sleeper: Arc<dyn Sleeper>,
}
