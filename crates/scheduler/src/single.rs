//! Evaluate one checkpoint and exit
//!
//! No ledger is consulted or written; the checkpoint is evaluated even if a
//! polling run already recorded its epoch.

use eval_core::{EpochId, MetricMap, Result, SplitId};
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use crate::collaborators::{Collaborators, EvalRequest, LoadOptions};
use crate::layout::OutputLayout;
use crate::scheduler::SchedulerSettings;

pub struct SingleCheckpointEvaluator {
    layout: OutputLayout,
    split: SplitId,
    settings: SchedulerSettings,
    collaborators: Collaborators,
}

impl SingleCheckpointEvaluator {
    pub fn new(
        layout: OutputLayout,
        split: impl Into<SplitId>,
        settings: SchedulerSettings,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            layout,
            split: split.into(),
            settings,
            collaborators,
        }
    }

    /// Epoch encoded in the checkpoint file name, if any
    pub fn epoch_of(checkpoint: &Path) -> Option<EpochId> {
        checkpoint
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(EpochId::from_last_number)
    }

    /// Directory the evaluation of `checkpoint` writes to
    pub fn output_dir(&self, checkpoint: &Path) -> PathBuf {
        self.layout
            .single_eval_dir(Self::epoch_of(checkpoint).as_ref(), &self.split)
    }

    /// Load `checkpoint`, evaluate it once and report the metrics
    ///
    /// Metrics are sent to the sink only when the file name carries an epoch.
    #[instrument(skip(self), fields(split = %self.split))]
    pub async fn evaluate_one(&self, checkpoint: &Path) -> Result<MetricMap> {
        let epoch = Self::epoch_of(checkpoint);
        let output_dir = self.output_dir(checkpoint);

        let options = LoadOptions {
            to_cpu: self.settings.to_cpu,
            load_head: false,
        };
        let model = self.collaborators.loader.load(checkpoint, options).await?;

        if self.settings.is_coordinator {
            tokio::fs::create_dir_all(&output_dir).await?;
        }

        let request = EvalRequest {
            model: &model,
            split: &self.split,
            epoch: epoch.as_ref(),
            output_dir: &output_dir,
            save_to_file: self.settings.save_to_file,
        };
        let label = request.epoch_label();
        let metrics = self.collaborators.evaluator.run(request).await?;

        if self.settings.is_coordinator {
            for (name, value) in &metrics {
                info!(epoch = %label, metric = %name, value, "Evaluation result");
            }
            if let Some(epoch) = &epoch {
                for (name, value) in &metrics {
                    if let Err(e) = self.collaborators.sink.emit(name, *value, epoch) {
                        warn!(metric = %name, error = %e, "Failed to report metric");
                    }
                }
            }
            if let Err(e) = self.collaborators.sink.flush() {
                warn!(error = %e, "Failed to flush metrics");
            }
        }

        Ok(metrics)
    }
}
