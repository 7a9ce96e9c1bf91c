//! Output directory layout
//!
//! ```text
//! <root>/<extra_tag>/
//!     ckpt/                                  default checkpoint directory
//!     eval/
//!         eval_all_default/<eval_tag>/       polling mode
//!             eval_list_<split>.txt
//!             metrics_<split>.jsonl
//!             epoch_<id>/<split>/
//!         epoch_<id>/<split>/<eval_tag>/     single-checkpoint mode
//! ```

use chrono::{DateTime, Local};
use eval_core::config::{OutputConfig, ScannerConfig};
use eval_core::EpochId;
use std::path::{Path, PathBuf};

const DEFAULT_EVAL_TAG: &str = "default";
const NO_NUMBER: &str = "no_number";

/// Resolves every path the evaluator reads or writes
#[derive(Debug, Clone)]
pub struct OutputLayout {
    experiment_dir: PathBuf,
    eval_tag: String,
}

impl OutputLayout {
    pub fn new(config: &OutputConfig) -> Self {
        let eval_tag = config
            .eval_tag
            .as_deref()
            .filter(|tag| !tag.is_empty())
            .unwrap_or(DEFAULT_EVAL_TAG)
            .to_string();

        Self {
            experiment_dir: config.root.join(&config.extra_tag),
            eval_tag,
        }
    }

    pub fn default_checkpoint_dir(&self) -> PathBuf {
        self.experiment_dir.join("ckpt")
    }

    /// Configured checkpoint directory, falling back to the default
    pub fn checkpoint_dir(&self, scanner: &ScannerConfig) -> PathBuf {
        scanner
            .checkpoint_dir
            .clone()
            .unwrap_or_else(|| self.default_checkpoint_dir())
    }

    fn eval_root(&self) -> PathBuf {
        self.experiment_dir.join("eval")
    }

    /// Output directory of a polling run
    pub fn repeat_eval_dir(&self) -> PathBuf {
        self.eval_root()
            .join("eval_all_default")
            .join(&self.eval_tag)
    }

    /// Output directory of a single-checkpoint run
    pub fn single_eval_dir(&self, epoch: Option<&EpochId>, split: &str) -> PathBuf {
        self.eval_root()
            .join(epoch_dir_name(epoch))
            .join(split)
            .join(&self.eval_tag)
    }

    pub fn ledger_path(eval_dir: &Path, split: &str) -> PathBuf {
        eval_dir.join(format!("eval_list_{split}.txt"))
    }

    pub fn metrics_path(eval_dir: &Path, split: &str) -> PathBuf {
        eval_dir.join(format!("metrics_{split}.jsonl"))
    }

    /// Per-epoch result directory handed to the evaluator
    pub fn epoch_result_dir(eval_dir: &Path, epoch: Option<&EpochId>, split: &str) -> PathBuf {
        eval_dir.join(epoch_dir_name(epoch)).join(split)
    }

    pub fn log_file_name(now: DateTime<Local>) -> String {
        format!("log_eval_{}.txt", now.format("%Y%m%d-%H%M%S"))
    }
}

fn epoch_dir_name(epoch: Option<&EpochId>) -> String {
    format!("epoch_{}", epoch.map(EpochId::as_str).unwrap_or(NO_NUMBER))
}
