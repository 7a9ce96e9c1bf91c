//! Command-line interface of `ckpt-eval`
//!
//! Flags override values from the optional TOML file. The merged
//! configuration is validated once and not modified afterwards.

use clap::Parser;
use eval_core::{Error, EvalConfig, Result};
use std::path::PathBuf;
use std::time::Duration;

/// What the invocation should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Evaluate one checkpoint and exit
    Single(PathBuf),

    /// Poll the checkpoint directory until the wait budget runs out
    Repeat,
}

/// Evaluate training checkpoints as they appear
#[derive(Debug, Parser)]
#[command(name = "ckpt-eval")]
#[command(about = "Evaluate model checkpoints written by a training run")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Evaluate every checkpoint in the checkpoint directory as it appears
    #[arg(long, conflicts_with = "ckpt")]
    pub eval_all: bool,

    /// Evaluate this checkpoint only
    #[arg(long)]
    pub ckpt: Option<PathBuf>,

    /// Directory the trainer writes checkpoints to
    #[arg(long)]
    pub ckpt_dir: Option<PathBuf>,

    /// Skip checkpoints with a lower epoch
    #[arg(long)]
    pub start_epoch: Option<f64>,

    /// Stop after waiting this many minutes without a new checkpoint
    #[arg(long)]
    pub max_waiting_mins: Option<f64>,

    /// Seconds between polls of the checkpoint directory
    #[arg(long)]
    pub poll_interval_secs: Option<f64>,

    /// Evaluation tag namespacing the output directory
    #[arg(long)]
    pub eval_tag: Option<String>,

    /// Experiment tag
    #[arg(long)]
    pub extra_tag: Option<String>,

    /// Root of the output tree
    #[arg(long)]
    pub output_root: Option<PathBuf>,

    /// Dataset split to evaluate (repeatable)
    #[arg(long = "split")]
    pub splits: Vec<String>,

    /// Keep per-sample evaluation results
    #[arg(long)]
    pub save_to_file: bool,

    /// Abort an evaluation command after this many seconds
    #[arg(long)]
    pub eval_timeout_secs: Option<f64>,

    /// Rank of this process
    #[arg(long, env = "RANK")]
    pub rank: Option<u32>,

    /// Number of cooperating processes
    #[arg(long, env = "WORLD_SIZE")]
    pub world_size: Option<u32>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    pub print_default_config: bool,

    /// Evaluation command, given after `--`
    #[arg(last = true)]
    pub evaluator_command: Vec<String>,
}

impl Cli {
    pub fn mode(&self) -> Result<RunMode> {
        match (&self.ckpt, self.eval_all) {
            (Some(path), _) => Ok(RunMode::Single(path.clone())),
            (None, true) => Ok(RunMode::Repeat),
            (None, false) => Err(Error::InvalidConfig {
                message: "either --ckpt or --eval-all is required".to_string(),
            }),
        }
    }

    /// Load the configuration file, apply flag overrides and validate
    pub fn resolve_config(&self) -> Result<EvalConfig> {
        let mut config = match &self.config {
            Some(path) => EvalConfig::from_file(path)?,
            None => EvalConfig::default(),
        };

        self.apply_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut EvalConfig) -> Result<()> {
        if let Some(dir) = &self.ckpt_dir {
            config.scanner.checkpoint_dir = Some(dir.clone());
        }
        if let Some(start_epoch) = self.start_epoch {
            config.scheduler.start_epoch = start_epoch;
        }
        if let Some(mins) = self.max_waiting_mins {
            config.scheduler.max_wait = seconds("--max-waiting-mins", mins * 60.0)?;
        }
        if let Some(secs) = self.poll_interval_secs {
            config.scheduler.poll_interval = seconds("--poll-interval-secs", secs)?;
        }
        if let Some(secs) = self.eval_timeout_secs {
            config.evaluator.timeout = Some(seconds("--eval-timeout-secs", secs)?);
        }
        if let Some(tag) = &self.eval_tag {
            config.output.eval_tag = Some(tag.clone());
        }
        if let Some(tag) = &self.extra_tag {
            config.output.extra_tag = tag.clone();
        }
        if let Some(root) = &self.output_root {
            config.output.root = root.clone();
        }
        if !self.splits.is_empty() {
            config.dataset.splits = self.splits.clone();
        }
        if self.save_to_file {
            config.output.save_to_file = true;
        }
        if let Some(rank) = self.rank {
            config.distributed.rank = rank;
        }
        if let Some(world_size) = self.world_size {
            config.distributed.world_size = world_size;
        }
        if !self.evaluator_command.is_empty() {
            config.evaluator.command = self.evaluator_command.clone();
        }
        Ok(())
    }
}

fn seconds(flag: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| Error::InvalidConfig {
        message: format!("{flag}: {e}"),
    })
}
