//! Checkpoint evaluation scheduler for ML training runs
//!
//! This crate drives evaluation of checkpoints written by a training process:
//! - **Scheduling**: poll for unevaluated checkpoints, evaluate, record, idle
//! - **Single mode**: evaluate one checkpoint and exit
//! - **Collaborators**: checkpoint loading, evaluation and metrics reporting
//!   behind traits, with file/process/JSONL implementations
//! - **Command line**: the `ckpt-eval` binary and its configuration overrides
//!
//! # Example
//!
//! ```ignore
//! use scheduler::{app, cli::Cli};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> eval_core::Result<()> {
//!     let cli = Cli::parse_from(["ckpt-eval", "--eval-all", "--", "python", "eval.py"]);
//!     let config = cli.resolve_config()?;
//!     app::run(&config, &cli.mode()?, std::future::pending()).await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod cli;
pub mod collaborators;
pub mod layout;
pub mod loader;
pub mod process;
pub mod scheduler;
pub mod single;
pub mod sinks;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use collaborators::{
    CheckpointLoader, Collaborators, EvalRequest, Evaluator, LoadOptions, LoadedModel,
    MetricsSink, Sleeper, TokioSleeper,
};
pub use layout::OutputLayout;
pub use scheduler::{
    open_scope_ledger, CheckpointEvaluationScheduler, EvaluationScope, SchedulerReport,
    SchedulerSettings, SchedulerState,
};
pub use single::SingleCheckpointEvaluator;
